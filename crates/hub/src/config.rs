//! TOML config file loading, validation, and device provisioning.

use anyhow::{bail, Context, Result};
use farming_common::{MAX_DURATION_SECS, MIN_DURATION_SECS};
use serde::Deserialize;
use std::collections::HashSet;
use time::OffsetDateTime;

use crate::db::Db;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub device_code: String,
    /// Cycle length stored for a freshly provisioned device.
    #[serde(default = "default_duration")]
    pub duration: i64,
}

fn default_duration() -> i64 {
    5
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = || {
                if d.device_code.is_empty() {
                    format!("devices[{i}]")
                } else {
                    format!("device '{}'", d.device_code)
                }
            };

            if d.device_code.trim().is_empty() {
                errors.push(format!("{}: device_code is empty", ctx()));
            } else if !seen.insert(&d.device_code) {
                errors.push(format!("{}: duplicate device_code", ctx()));
            }

            if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&d.duration) {
                errors.push(format!(
                    "{}: duration {} out of range [{MIN_DURATION_SECS}, {MAX_DURATION_SECS}]",
                    ctx(),
                    d.duration
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Provision every configured device that is not in the database yet.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    for d in &config.devices {
        db.provision_device(&d.device_code, d.duration, now)
            .await
            .with_context(|| format!("failed to provision device '{}'", d.device_code))?;
    }

    tracing::info!(devices = config.devices.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_device() -> DeviceEntry {
        DeviceEntry {
            device_code: "FARM-001".into(),
            duration: 5,
        }
    }

    fn valid_config() -> Config {
        Config {
            devices: vec![valid_device()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[[devices]]
device_code = "FARM-001"
duration = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].device_code, "FARM-001");
        assert_eq!(config.devices[0].duration, 10);
    }

    #[test]
    fn parse_defaults_duration() {
        let config: Config = toml::from_str("[[devices]]\ndevice_code = \"FARM-002\"\n").unwrap();
        assert_eq!(config.devices[0].duration, 5);
    }

    #[test]
    fn parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.devices.is_empty());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn empty_device_code_rejected() {
        let mut cfg = valid_config();
        cfg.devices[0].device_code = "  ".into();
        assert_validation_err(&cfg, "device_code is empty");
    }

    #[test]
    fn duplicate_device_code_rejected() {
        let mut cfg = valid_config();
        cfg.devices.push(valid_device());
        assert_validation_err(&cfg, "duplicate device_code");
    }

    #[test]
    fn duration_zero_rejected() {
        let mut cfg = valid_config();
        cfg.devices[0].duration = 0;
        assert_validation_err(&cfg, "duration 0 out of range [1, 300]");
    }

    #[test]
    fn duration_above_max_rejected() {
        let mut cfg = valid_config();
        cfg.devices[0].duration = 301;
        assert_validation_err(&cfg, "duration 301 out of range");
    }

    #[test]
    fn duration_bounds_accepted() {
        let cfg = Config {
            devices: vec![
                DeviceEntry {
                    device_code: "A".into(),
                    duration: 1,
                },
                DeviceEntry {
                    device_code: "B".into(),
                    duration: 300,
                },
            ],
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn multiple_errors_collected() {
        let cfg = Config {
            devices: vec![DeviceEntry {
                device_code: "".into(),
                duration: -1,
            }],
        };
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("2 errors"), "got: {msg}");
        assert!(msg.contains("devices[0]: device_code is empty"), "got: {msg}");
        assert!(msg.contains("duration -1"), "got: {msg}");
    }

    // -- DB integration ---------------------------------------------------

    #[tokio::test]
    async fn apply_provisions_database() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        apply(&valid_config(), &db).await.unwrap();

        let devices = db.load_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_code, "FARM-001");
        assert!(!devices[0].pump_status);
    }
}
