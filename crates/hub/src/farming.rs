//! Device State Source, Command Sink and ingestion rules. Shared by the HTTP
//! handlers and the MQTT bridge so both paths validate the same way.

use farming_common::{
    is_offline, CommandAck, DeviceData, IngestReading, PumpCommand, SensorLog, MAX_DURATION_SECS,
    MIN_DURATION_SECS,
};
use time::OffsetDateTime;

use crate::db::{Db, DeviceRow};
use crate::error::ApiError;

/// Sensor history returned per device.
pub const SENSOR_LOG_LIMIT: i64 = 50;
/// Irrigation history returned per device.
pub const IRRIGATION_LOG_LIMIT: i64 = 20;

/// Highest raw ADC value a soil sensor can report.
const SOIL_RAW_MAX: f64 = 4095.0;

pub async fn list_devices(db: &Db) -> Result<Vec<DeviceData>, ApiError> {
    let rows = db.load_devices().await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let logs = db.recent_sensor_logs(row.id, SENSOR_LOG_LIMIT).await?;
        let irrigation_logs = db.recent_irrigation_logs(row.id, IRRIGATION_LOG_LIMIT).await?;
        out.push(DeviceData {
            last_seen: row.last_seen_at(),
            device_code: row.device_code,
            pump_status: row.pump_status,
            duration: row.duration,
            logs,
            irrigation_logs,
        });
    }
    Ok(out)
}

async fn require_device(db: &Db, device_code: &str) -> Result<DeviceRow, ApiError> {
    if device_code.trim().is_empty() {
        return Err(ApiError::BadRequest("deviceCode is required".into()));
    }
    db.device_by_code(device_code)
        .await?
        .ok_or_else(|| ApiError::DeviceNotFound(device_code.to_string()))
}

fn check_duration(duration: i64) -> Result<i64, ApiError> {
    if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
        Ok(duration)
    } else {
        Err(ApiError::BadRequest(format!(
            "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds"
        )))
    }
}

/// Validate and persist a pump command.
///
/// Turning the pump on needs a duration and a live device. Turning it off
/// keeps the stored duration unless a new one is given.
pub async fn apply_command(
    db: &Db,
    cmd: &PumpCommand,
    now: OffsetDateTime,
) -> Result<CommandAck, ApiError> {
    let device = require_device(db, &cmd.device_code).await?;

    let duration = match (cmd.pump_status, cmd.duration) {
        (_, Some(d)) => check_duration(d)?,
        (true, None) => {
            return Err(ApiError::BadRequest(
                "duration is required when turning the pump on".into(),
            ))
        }
        (false, None) => device.duration,
    };

    // Stopping is always allowed; it is how a stuck cycle gets cleared.
    if cmd.pump_status && is_offline(Some(device.last_seen_at()), now) {
        return Err(ApiError::DeviceOffline(device.device_code));
    }

    db.apply_command(device.id, cmd.pump_status, duration, now)
        .await?;

    Ok(CommandAck {
        device_code: device.device_code,
        pump_status: cmd.pump_status,
        duration,
    })
}

fn check_reading(reading: &IngestReading) -> Result<(), ApiError> {
    let fields = [
        ("temp", reading.temp),
        ("humidity", reading.humidity),
        ("soilMoisture", reading.soil_moisture),
    ];
    if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(ApiError::BadRequest(format!("{name} must be a finite number")));
    }
    if !(0.0..=100.0).contains(&reading.humidity) {
        return Err(ApiError::BadRequest("humidity must be between 0 and 100".into()));
    }
    if !(0.0..=SOIL_RAW_MAX).contains(&reading.soil_moisture) {
        return Err(ApiError::BadRequest(
            "soilMoisture must be between 0 and 4095".into(),
        ));
    }
    Ok(())
}

/// Store a telemetry sample. Doubles as the device heartbeat.
pub async fn ingest(
    db: &Db,
    reading: &IngestReading,
    now: OffsetDateTime,
) -> Result<SensorLog, ApiError> {
    if reading.device_code.trim().is_empty() {
        return Err(ApiError::BadRequest("deviceCode is required".into()));
    }
    check_reading(reading)?;
    let device = require_device(db, &reading.device_code).await?;

    let log = db
        .insert_sensor_log(
            device.id,
            reading.temp,
            reading.humidity,
            reading.soil_moisture,
            now,
        )
        .await?;
    db.heartbeat(device.id, now).await?;

    Ok(log)
}

/// The device told us its pump state.
pub async fn report_pump_state(
    db: &Db,
    device_code: &str,
    pump_status: bool,
    now: OffsetDateTime,
) -> Result<(), ApiError> {
    let device = require_device(db, device_code).await?;
    db.record_pump_report(device.id, pump_status, now).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
