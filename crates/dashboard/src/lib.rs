//! Client-side control loop for the farming dashboard: keeps a local view of
//! one device fresh, interpolates the pump countdown between refreshes, and
//! dispatches start commands with an optimistic update.

pub mod api;
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod estimate;
pub mod poller;
pub mod ticker;

pub use api::{FarmingApi, HttpApi};
pub use dashboard::{Clock, Dashboard, Snapshot};
pub use dispatch::CommandPhase;
pub use error::DashboardError;
pub use poller::PollDelay;
