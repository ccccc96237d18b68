//! Error types for state access.

use std::path::PathBuf;
use std::time::Duration;

use tether_wire::{ErrorCode, WireError};
use thiserror::Error;

/// Result type for state queries.
pub type StateResult<T> = Result<T, StateError>;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while querying a participant.
#[derive(Debug, Error)]
pub enum StateError {
    /// Could not open a connection to the participant.
    #[error("cannot reach {addr}: {source}")]
    Unreachable {
        addr: String,
        source: std::io::Error,
    },

    /// The call did not complete within its deadline.
    #[error("call to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    /// The participant closed the connection without answering.
    #[error("connection to {addr} closed before a response arrived")]
    ConnectionClosed { addr: String },

    /// Framing or decoding failed.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The participant answered with an error payload.
    #[error("remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The participant answered with the wrong kind of payload.
    #[error("unexpected response to {query}: {got}")]
    UnexpectedResponse { query: &'static str, got: String },

    /// The local record store failed.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

impl StateError {
    /// Returns true if the call failed in transit rather than being answered.
    ///
    /// Transport failures are the expected way a dead or partitioned
    /// participant shows up.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::ConnectionClosed { .. } | Self::Wire(_)
        )
    }

    /// Returns true if an arbiter reported that it could not reach the
    /// target of a bounced call.
    pub fn is_bounce_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                code: ErrorCode::Unreachable,
                ..
            }
        )
    }
}

/// Errors from the durable record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error on a record file.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record file holds invalid JSON.
    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A record could not be serialized.
    #[error("cannot serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Collection or key is empty or made only of dots.
    #[error("invalid record key: '{0}'")]
    InvalidKey(String),
}
