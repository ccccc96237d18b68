//! Database controller contract.

use std::future::Future;
use std::sync::Arc;

use crate::error::ControllerResult;

/// Carries out role transitions on the local database.
///
/// The [`Decider`](crate::Decider) only ever asks for transitions; what a
/// transition means for the database (hooks, replication setup, restarts) is
/// up to the implementation. Implementations record the node's resulting role
/// themselves.
pub trait Performer: Send + Sync {
    /// One-time preparation of the database before its first start.
    fn initialize(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Starts the database in whatever role it last recorded.
    fn start(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Stops the database. Stopping a stopped database is a no-op.
    fn stop(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Makes this node serve writes with a replica attached.
    fn transition_to_active(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Makes this node replicate from its peer.
    fn transition_to_backup(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Makes this node serve writes alone.
    fn transition_to_single(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Watches the database until [`Performer::shutdown`] is called.
    ///
    /// Returns `Err` when the database fails in a way the controller cannot
    /// recover from.
    fn run(&self) -> impl Future<Output = ControllerResult<()>> + Send;

    /// Stops the database, waits until it is down, then ends [`Performer::run`].
    fn shutdown(&self) -> impl Future<Output = ControllerResult<()>> + Send;
}

impl<T: Performer> Performer for Arc<T> {
    fn initialize(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).initialize()
    }

    fn start(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).start()
    }

    fn stop(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).stop()
    }

    fn transition_to_active(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).transition_to_active()
    }

    fn transition_to_backup(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).transition_to_backup()
    }

    fn transition_to_single(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).transition_to_single()
    }

    fn run(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).run()
    }

    fn shutdown(&self) -> impl Future<Output = ControllerResult<()>> + Send {
        (**self).shutdown()
    }
}
