//! Local one-second countdown between authoritative refreshes.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use crate::dashboard::Shared;
use crate::poller;

pub const TICK: Duration = Duration::from_secs(1);

/// One step of the countdown. Never goes below zero.
pub fn tick(countdown: u32) -> u32 {
    countdown.saturating_sub(1)
}

/// Decrement the shared countdown once per [`TICK`] until it reaches zero,
/// then wake the poller so it can pick up the end of the cycle. The first
/// tick lands a full period after the task starts, so every authoritative
/// write restarts the phase by replacing this task.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut every = interval_at(Instant::now() + TICK, TICK);
    loop {
        every.tick().await;
        let mut st = shared.state.lock().await;
        st.view.countdown = tick(st.view.countdown);
        if st.view.countdown == 0 {
            poller::reschedule(&mut st.view);
            drop(st);
            debug!("countdown reached zero");
            shared.wake.notify_one();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_decrements() {
        assert_eq!(tick(30), 29);
        assert_eq!(tick(1), 0);
    }

    #[test]
    fn tick_stops_at_zero() {
        assert_eq!(tick(0), 0);
    }
}
