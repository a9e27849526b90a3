//! Adaptive refresh schedule.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::dashboard::{self, Shared, Snapshot};

/// How long the poller waits before the next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollDelay {
    /// A cycle is counting down.
    Fast,
    /// The countdown is over but the hub still reports the pump on.
    Recheck,
    /// Nothing running.
    #[default]
    Slow,
}

impl PollDelay {
    pub fn duration(self) -> Duration {
        match self {
            Self::Fast => Duration::from_millis(1000),
            Self::Recheck => Duration::from_millis(2000),
            Self::Slow => Duration::from_millis(30_000),
        }
    }
}

impl fmt::Display for PollDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.duration().as_millis())
    }
}

/// Pick the next delay from the current countdown and the last reported
/// pump state.
pub fn next_delay(countdown: u32, pump_status: bool) -> PollDelay {
    if countdown > 0 {
        PollDelay::Fast
    } else if pump_status {
        PollDelay::Recheck
    } else {
        PollDelay::Slow
    }
}

/// Store and return the delay `view` currently calls for.
pub(crate) fn reschedule(view: &mut Snapshot) -> PollDelay {
    let delay = next_delay(view.countdown, view.pump_running());
    view.next_poll = delay;
    delay
}

/// Fetch, then sleep for the delay the resulting state calls for. A wake-up
/// (countdown finished, command sent) re-evaluates the delay without an
/// extra fetch. Runs until the task is aborted.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut fetch = true;
    loop {
        if fetch {
            // Failures are recorded on the snapshot; keep polling.
            let _ = dashboard::refresh(&shared).await;
        }

        let delay = reschedule(&mut shared.state.lock().await.view);
        debug!(%delay, "next poll");

        tokio::select! {
            _ = sleep(delay.duration()) => fetch = true,
            _ = shared.wake.notified() => fetch = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_down_polls_fast() {
        assert_eq!(next_delay(12, true), PollDelay::Fast);
        assert_eq!(next_delay(1, false), PollDelay::Fast);
    }

    #[test]
    fn pump_still_on_after_countdown_rechecks() {
        assert_eq!(next_delay(0, true), PollDelay::Recheck);
    }

    #[test]
    fn idle_polls_slowly() {
        assert_eq!(next_delay(0, false), PollDelay::Slow);
    }

    #[test]
    fn delays() {
        assert_eq!(PollDelay::Fast.duration(), Duration::from_secs(1));
        assert_eq!(PollDelay::Recheck.duration(), Duration::from_secs(2));
        assert_eq!(PollDelay::Slow.duration(), Duration::from_secs(30));
        assert_eq!(PollDelay::Slow.to_string(), "30000ms");
    }
}
