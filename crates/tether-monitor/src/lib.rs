//! # tether-monitor: Failover decisions for `tether`
//!
//! Two pieces cooperate on every database node:
//!
//! - The [`Decider`] watches the peer (directly, or bounced through the
//!   arbiter) and decides which role this node should hold.
//! - A [`Performer`] carries out those decisions on the actual database. The
//!   bundled [`CommandController`] does so through shell command hooks.
//!
//! ```text
//!                ┌─────────┐ dynamic_role ┌──────────────┐
//!   peer ◀───────│ Decider │─────────────▶│ arbiter      │──▶ peer (bounce)
//!                └────┬────┘              └──────────────┘
//!                     │ transition_to_*
//!                ┌────▼──────────────┐ records role ┌────────────┐
//!                │ Performer         │─────────────▶│ LocalState │
//!                └───────────────────┘              └────────────┘
//! ```

mod decider;
mod error;
mod performer;
mod process;

#[cfg(test)]
mod tests;

pub use decider::{DEFAULT_RETRY_PAUSE, Decider};
pub use error::{ControllerError, ControllerResult, MonitorError, MonitorResult};
pub use performer::Performer;
pub use process::{CommandController, ControllerSettings, DatabaseCommands};
