//! Local view of one device, kept fresh by the poller and the ticker and
//! updated by start commands.
//!
//! Authoritative writes (a successful fetch, a command acknowledgement)
//! replace the view wholesale and restart the ticker phase. Every fetch takes
//! a sequence number when it starts; its result is applied only if nothing
//! started after it has been applied already. A command acknowledgement takes
//! a number too, so a fetch that was in flight when the command landed cannot
//! roll the countdown back.

use farming_common::{is_offline, DeviceData, PumpCommand};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::FarmingApi;
use crate::dispatch::{self, CommandPhase};
use crate::error::{DashboardError, COMMAND_FAILED, FETCH_FAILED};
use crate::estimate::remaining_secs;
use crate::poller::{self, PollDelay};
use crate::ticker;

/// Source of "now" for liveness and countdown math.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// What the operator sees.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub device: Option<DeviceData>,
    /// Whole seconds left in the running cycle.
    pub countdown: u32,
    /// Last user-facing error, cleared by the next success.
    pub error: Option<String>,
    pub loading: bool,
    /// A start command is in flight.
    pub action_loading: bool,
    pub command: CommandPhase,
    pub next_poll: PollDelay,
}

impl Snapshot {
    pub fn is_offline(&self, now: OffsetDateTime) -> bool {
        is_offline(self.device.as_ref().map(|d| d.last_seen), now)
    }

    pub fn pump_running(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.pump_status)
    }
}

pub(crate) struct State {
    pub(crate) view: Snapshot,
    /// Sequence number of the last authoritative write.
    applied_seq: u64,
}

pub(crate) struct Shared {
    api: Arc<dyn FarmingApi>,
    device_code: String,
    clock: Clock,
    pub(crate) state: Mutex<State>,
    /// Poked when the schedule should be re-evaluated early.
    pub(crate) wake: Notify,
    next_seq: AtomicU64,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    /// Set by shutdown; keeps late writes from re-arming the ticker.
    stopped: AtomicBool,
}

impl Shared {
    fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the running ticker with one counting down the current value.
    /// Called with the state lock held so the new phase starts from the
    /// value just written.
    fn restart_ticker(self: &Arc<Self>, countdown: u32) {
        let mut slot = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
        if countdown > 0 && !self.stopped.load(Ordering::SeqCst) {
            *slot = Some(tokio::spawn(ticker::run(Arc::clone(self))));
        }
    }

    fn stop_ticker(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut slot = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
    }
}

/// Fetch the device list and, unless a newer write has landed meanwhile,
/// make it the current view.
pub(crate) async fn refresh(shared: &Arc<Shared>) -> Result<(), DashboardError> {
    let seq = shared.take_seq();
    shared.state.lock().await.view.loading = true;

    let result = shared.api.fetch_devices().await;

    let mut st = shared.state.lock().await;
    if seq < st.applied_seq {
        debug!(seq, applied = st.applied_seq, "discarding stale fetch");
        return Ok(());
    }
    st.view.loading = false;

    match result {
        Ok(devices) => {
            let device = devices
                .into_iter()
                .find(|d| d.device_code == shared.device_code);
            if device.is_none() {
                warn!(device = %shared.device_code, "device missing from hub response");
            }
            let countdown = device.as_ref().map_or(0, |d| {
                remaining_secs(d.pump_status, d.duration, d.last_seen, shared.now())
            });

            st.applied_seq = seq;
            st.view.device = device;
            st.view.countdown = countdown;
            st.view.error = None;
            poller::reschedule(&mut st.view);
            shared.restart_ticker(countdown);
            Ok(())
        }
        Err(e) => {
            let e = DashboardError::from(e);
            warn!("refresh failed: {e}");
            st.view.error = Some(e.user_message(FETCH_FAILED));
            Err(e)
        }
    }
}

/// Handle to a running dashboard. Dropping it stops the background tasks.
pub struct Dashboard {
    shared: Arc<Shared>,
    poller: StdMutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(api: Arc<dyn FarmingApi>, device_code: impl Into<String>) -> Self {
        Self::with_clock(api, device_code, Arc::new(OffsetDateTime::now_utc))
    }

    pub fn with_clock(
        api: Arc<dyn FarmingApi>,
        device_code: impl Into<String>,
        clock: Clock,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                device_code: device_code.into(),
                clock,
                state: Mutex::new(State {
                    view: Snapshot::default(),
                    applied_seq: 0,
                }),
                wake: Notify::new(),
                next_seq: AtomicU64::new(0),
                ticker: StdMutex::new(None),
                stopped: AtomicBool::new(false),
            }),
            poller: StdMutex::new(None),
        }
    }

    pub fn device_code(&self) -> &str {
        &self.shared.device_code
    }

    pub fn now(&self) -> OffsetDateTime {
        self.shared.now()
    }

    /// Start polling. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut slot = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shared.stopped.store(false, Ordering::SeqCst);
        info!(device = %self.shared.device_code, "dashboard polling started");
        *slot = Some(tokio::spawn(poller::run(Arc::clone(&self.shared))));
    }

    /// Stop polling and the countdown. No timer fires after this returns.
    pub fn shutdown(&self) {
        if let Some(h) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            h.abort();
        }
        self.shared.stop_ticker();
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().await.view.clone()
    }

    /// Fetch now, outside the poll schedule.
    pub async fn refresh(&self) -> Result<(), DashboardError> {
        let res = refresh(&self.shared).await;
        self.shared.wake.notify_one();
        res
    }

    /// Run the pump for `duration_secs`. On acknowledgement the countdown is
    /// set to the requested duration at once, then reconciled by a fetch.
    /// On failure the countdown is reset and the error kept for display.
    pub async fn start_irrigation(&self, duration_secs: i64) -> Result<(), DashboardError> {
        let shared = &self.shared;

        let duration = {
            let mut st = shared.state.lock().await;
            match dispatch::check_start(&st.view, duration_secs, shared.now()) {
                Ok(d) => {
                    st.view.action_loading = true;
                    st.view.error = None;
                    st.view.command = CommandPhase::Pending { duration: d };
                    d
                }
                Err(e) => {
                    st.view.error = Some(e.user_message(COMMAND_FAILED));
                    return Err(e);
                }
            }
        };

        let cmd = PumpCommand {
            device_code: shared.device_code.clone(),
            pump_status: true,
            duration: Some(i64::from(duration)),
        };
        info!(device = %cmd.device_code, duration, "starting irrigation");
        let result = shared.api.send_command(&cmd).await;

        {
            let mut st = shared.state.lock().await;
            let phase = std::mem::take(&mut st.view.command);
            match result {
                Ok(ack) => {
                    debug!(?ack, "command acknowledged");
                    st.applied_seq = shared.take_seq();
                    st.view.command = phase.confirm();
                    st.view.countdown = duration;
                    poller::reschedule(&mut st.view);
                    shared.restart_ticker(duration);
                }
                Err(e) => {
                    let e = DashboardError::from(e);
                    let message = e.user_message(COMMAND_FAILED);
                    warn!("pump command failed: {e}");
                    st.view.command = phase.roll_back(message.clone());
                    st.view.error = Some(message);
                    st.view.countdown = 0;
                    st.view.action_loading = false;
                    poller::reschedule(&mut st.view);
                    shared.restart_ticker(0);
                    return Err(e);
                }
            }
        }

        // Reconcile with the hub; a failure here is shown but the command stands.
        let _ = refresh(shared).await;
        shared.state.lock().await.view.action_loading = false;
        shared.wake.notify_one();
        Ok(())
    }

    #[cfg(test)]
    fn ticker_running(&self) -> bool {
        self.shared
            .ticker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
