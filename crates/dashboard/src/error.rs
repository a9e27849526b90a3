use thiserror::Error;

use crate::api::ApiError;

/// Shown when a refresh fails without a usable message from the hub.
pub const FETCH_FAILED: &str = "failed to connect to device";
/// Shown when a command fails without a usable message from the hub.
pub const COMMAND_FAILED: &str = "failed to control the pump";

/// Everything a dashboard operation can fail with. The `Display` text is what
/// the operator sees.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("duration must be between 1 and 300 seconds (got {0})")]
    InvalidDuration(i64),

    #[error("no device data loaded yet")]
    NoDevice,

    #[error("device is offline, check its power and network connection")]
    Offline,

    #[error("pump is already running")]
    PumpRunning,

    #[error("a pump command is already in flight")]
    Busy,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DashboardError {
    /// Operator-facing text, substituting `fallback` for hub errors that
    /// carry no message of their own.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Api(e) => e.user_message(fallback),
            other => other.to_string(),
        }
    }
}
