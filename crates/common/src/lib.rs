//! Types and rules shared by the hub, the simulated device and the dashboard.

pub mod liveness;
pub mod soil;
pub mod wire;

pub use liveness::{is_offline, STALE_THRESHOLD_MS};
pub use soil::soil_percentage;
pub use wire::{
    CommandAck, DeviceData, Envelope, IngestReading, IrrigationLog, PumpCommand, SensorLog,
    MAX_DURATION_SECS, MIN_DURATION_SECS,
};
