//! Start-command validation and the optimistic command lifecycle.

use farming_common::{is_offline, MAX_DURATION_SECS, MIN_DURATION_SECS};
use time::OffsetDateTime;

use crate::dashboard::Snapshot;
use crate::error::DashboardError;

/// Where the most recent start command stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandPhase {
    #[default]
    Idle,
    /// Sent, countdown not yet committed.
    Pending { duration: u32 },
    /// Acknowledged by the hub; the countdown was set to `duration`.
    Confirmed { duration: u32 },
    /// Failed; the countdown was reset.
    RolledBack { reason: String },
}

impl CommandPhase {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Pending becomes Confirmed. Any other phase is left alone.
    pub fn confirm(self) -> Self {
        match self {
            Self::Pending { duration } => Self::Confirmed { duration },
            other => other,
        }
    }

    /// Pending becomes RolledBack. Any other phase is left alone.
    pub fn roll_back(self, reason: impl Into<String>) -> Self {
        match self {
            Self::Pending { .. } => Self::RolledBack {
                reason: reason.into(),
            },
            other => other,
        }
    }
}

pub fn validate_duration(secs: i64) -> Result<u32, DashboardError> {
    if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&secs) {
        // Range check above keeps this lossless.
        Ok(secs as u32)
    } else {
        Err(DashboardError::InvalidDuration(secs))
    }
}

/// Decide whether a start command may be sent from `view` at `now`.
/// Returns the validated duration.
pub fn check_start(view: &Snapshot, secs: i64, now: OffsetDateTime) -> Result<u32, DashboardError> {
    if view.action_loading || view.command.is_pending() {
        return Err(DashboardError::Busy);
    }
    let duration = validate_duration(secs)?;
    let device = view.device.as_ref().ok_or(DashboardError::NoDevice)?;
    // During a cycle last_seen is the cycle start, so check running first.
    if device.pump_status || view.countdown > 0 {
        return Err(DashboardError::PumpRunning);
    }
    if is_offline(Some(device.last_seen), now) {
        return Err(DashboardError::Offline);
    }
    Ok(duration)
}
