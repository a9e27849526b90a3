use farming_common::{IngestReading, PumpCommand};
use rumqttc::{AsyncClient, QoS};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::Db;
use crate::farming;
use crate::state::{EventKind, SharedState};

/// Topic the relay listens on.
pub(crate) const RELAY_TOPIC: &str = "relay/set";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the device code from "tele/<device_code>/reading".
pub(crate) fn extract_telemetry_device(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "reading" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract the device code from "pump/<device_code>/state".
pub(crate) fn extract_pump_state_device(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "pump" && parts[2] == "state" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

pub(crate) fn pump_command_topic(device_code: &str) -> String {
    format!("pump/{device_code}/set")
}

/// Parse an "ON"/"OFF" payload into a bool (case-insensitive, trims whitespace).
pub(crate) fn parse_on_off(payload: &[u8]) -> Result<bool, String> {
    let s = String::from_utf8_lossy(payload).trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown pump state '{s}'")),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Forward an accepted command to the device. Best-effort: the command is
/// already persisted, a full queue only costs the notification.
pub(crate) fn notify_pump_command(mqtt: &AsyncClient, cmd: &PumpCommand) {
    let payload = match serde_json::to_vec(cmd) {
        Ok(p) => p,
        Err(e) => {
            warn!("pump command encode failed: {e}");
            return;
        }
    };
    if let Err(e) = mqtt.try_publish(
        pump_command_topic(&cmd.device_code),
        QoS::AtLeastOnce,
        false,
        payload,
    ) {
        warn!(device = %cmd.device_code, "pump command publish failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Route one incoming publish. Errors are logged and recorded, never fatal.
pub(crate) async fn handle_publish(topic: &str, payload: &[u8], db: &Db, shared: &SharedState) {
    let now = OffsetDateTime::now_utc();

    if let Some(device_code) = extract_telemetry_device(topic) {
        let reading = match serde_json::from_slice::<IngestReading>(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(%topic, "bad telemetry json: {e}");
                shared
                    .write()
                    .await
                    .record(EventKind::Error, format!("bad telemetry json: {e}"));
                return;
            }
        };
        if reading.device_code != device_code {
            warn!(%topic, body = %reading.device_code, "telemetry device code mismatch");
            shared.write().await.record(
                EventKind::Error,
                format!("{topic}: body names device '{}'", reading.device_code),
            );
            return;
        }

        match farming::ingest(db, &reading, now).await {
            Ok(log) => {
                let soil = farming_common::soil_percentage(log.soil_moisture);
                shared.write().await.record(
                    EventKind::Telemetry,
                    format!(
                        "{device_code}: {:.1}°C {:.0}% soil {soil}%",
                        log.temperature, log.humidity
                    ),
                );
            }
            Err(e) => {
                warn!(device = %device_code, "telemetry rejected: {e}");
                shared
                    .write()
                    .await
                    .record(EventKind::Error, format!("{device_code}: {e}"));
            }
        }
    } else if let Some(device_code) = extract_pump_state_device(topic) {
        let on = match parse_on_off(payload) {
            Ok(on) => on,
            Err(msg) => {
                warn!(%topic, "{msg} (use ON/OFF)");
                shared.write().await.record(EventKind::Error, msg);
                return;
            }
        };

        match farming::report_pump_state(db, device_code, on, now).await {
            Ok(()) => {
                let state_str = if on { "ON" } else { "OFF" };
                info!(device = %device_code, "pump reported {state_str}");
                shared
                    .write()
                    .await
                    .record(EventKind::Pump, format!("{device_code} reported {state_str}"));
            }
            Err(e) => {
                warn!(device = %device_code, "pump report rejected: {e}");
                shared
                    .write()
                    .await
                    .record(EventKind::Error, format!("{device_code}: {e}"));
            }
        }
    } else {
        warn!(%topic, "unhandled topic");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
