//! Error types for the decision engine and the database controller.

use std::io;
use std::process::ExitStatus;

use tether_state::StateError;
use thiserror::Error;

/// Errors raised by the [`Decider`](crate::Decider).
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Neither the peer nor the arbiter could be reached, or this node cannot
    /// safely take over. The database has been stopped; retry later.
    #[error("none of the nodes in the cluster are available")]
    ClusterUnavailable,

    /// Waiting for the cluster was cancelled.
    #[error("startup cancelled before the cluster became ready")]
    Cancelled,

    /// This node's own state could not be read.
    #[error("local state error: {0}")]
    State(#[from] StateError),

    /// The database controller failed.
    #[error("database controller error: {0}")]
    Controller(#[from] ControllerError),
}

impl MonitorError {
    /// Returns true for the retryable [`MonitorError::ClusterUnavailable`].
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Self::ClusterUnavailable)
    }
}

/// Result type for decision engine operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors raised by a [`Performer`](crate::Performer).
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Spawning a command failed.
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    /// A hook command exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    /// The database process died during its start grace period.
    #[error("database failed to start: {0}")]
    StartFailed(String),

    /// The database process exited while it was supposed to be running.
    #[error("database process exited unexpectedly with code {code:?}")]
    ProcessExited { code: Option<i32> },

    /// Recording the node's role or sync flag failed.
    #[error("failed to record node state: {0}")]
    State(#[from] StateError),
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;
