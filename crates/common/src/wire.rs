//! JSON bodies exchanged between the hub, the device and the dashboard.
//! Field names are camelCase on the wire; timestamps are RFC 3339.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Shortest pump cycle an operator may request, in seconds.
pub const MIN_DURATION_SECS: i64 = 1;
/// Longest pump cycle an operator may request, in seconds.
pub const MAX_DURATION_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// Every hub response is wrapped in this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_devices: Option<usize>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            total_devices: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            total_devices: None,
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Device State Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorLog {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrrigationLog {
    pub id: i64,
    pub duration: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One device with its recent history, newest entries first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    pub device_code: String,
    pub pump_status: bool,
    pub duration: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(default)]
    pub logs: Vec<SensorLog>,
    #[serde(default)]
    pub irrigation_logs: Vec<IrrigationLog>,
}

// ---------------------------------------------------------------------------
// Command Sink
// ---------------------------------------------------------------------------

/// Pump command. Also the payload of `pump/<code>/set` on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpCommand {
    pub device_code: String,
    pub pump_status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub device_code: String,
    pub pump_status: bool,
    pub duration: i64,
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Telemetry sample as sent by the device, over HTTP or `tele/<code>/reading`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReading {
    pub temp: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub device_code: String,
}

// ===========================================================================
// Tests
// ===========================================================================
