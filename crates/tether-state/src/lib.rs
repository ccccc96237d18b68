//! # tether-state: Node state access for `tether`
//!
//! The decision engine never talks to sockets or files directly. It asks
//! [`NodeState`] accessors about each participant, and the accessor decides
//! how to find out:
//!
//! | Variant            | Backed by                                          |
//! |--------------------|----------------------------------------------------|
//! | [`LocalState`]     | the durable [`RecordStore`] of this process        |
//! | [`RemoteState`]    | an RPC call to the participant                     |
//! | [`BouncedState`]   | an RPC call to the arbiter, relayed to the target  |
//!
//! [`Arbiter`] extends the contract with [`Arbiter::bounce`], which is how a
//! node tells "my peer is dead" apart from "my link to my peer is down".
//!
//! The crate also hosts the [`RpcServer`] every node runs so that its own
//! [`LocalState`] can be queried (and bounced through) by the others.

use std::future::Future;
use std::sync::Arc;

use tether_types::{ConfiguredRole, DynamicRole};

mod bounce;
mod error;
mod local;
mod remote;
mod server;
mod store;


pub use bounce::BouncedState;
pub use error::{StateError, StateResult, StoreError, StoreResult};
pub use local::LocalState;
pub use remote::{DEFAULT_CALL_TIMEOUT, DEFAULT_READY_RETRY, RemoteState};
pub use server::{RequestHandler, RpcServer};
pub use store::RecordStore;

/// Uniform read access to a cluster participant.
///
/// Implementations must be safe to share between the periodic decision loop
/// and manual promote/demote callers.
pub trait NodeState: Send + Sync {
    /// Current dynamic role.
    ///
    /// An unreachable remote is a transport error, never [`DynamicRole::Dead`];
    /// `Dead` only ever comes from the participant itself.
    fn dynamic_role(&self) -> impl Future<Output = StateResult<DynamicRole>> + Send;

    /// Static role from configuration.
    fn configured_role(&self) -> impl Future<Output = StateResult<ConfiguredRole>> + Send;

    /// Whether this participant's replica is caught up with the last known
    /// active. Only meaningful while the participant is a backup.
    fn has_synced(&self) -> impl Future<Output = StateResult<bool>> + Send;

    /// Network address other participants use to reach this one.
    fn location(&self) -> &str;

    /// Resolves once the participant accepts calls.
    ///
    /// There is no timeout: the future keeps waiting until the participant
    /// shows up. Drop the future to stop waiting.
    fn ready(&self) -> impl Future<Output = ()> + Send;
}

/// A participant that can run calls against a third address on the caller's
/// behalf.
pub trait Arbiter: NodeState {
    type Bounced: NodeState;

    /// Returns an accessor whose calls are relayed through this arbiter to
    /// `target`.
    fn bounce(&self, target: &str) -> Self::Bounced;
}

impl<T: NodeState> NodeState for Arc<T> {
    fn dynamic_role(&self) -> impl Future<Output = StateResult<DynamicRole>> + Send {
        (**self).dynamic_role()
    }

    fn configured_role(&self) -> impl Future<Output = StateResult<ConfiguredRole>> + Send {
        (**self).configured_role()
    }

    fn has_synced(&self) -> impl Future<Output = StateResult<bool>> + Send {
        (**self).has_synced()
    }

    fn location(&self) -> &str {
        (**self).location()
    }

    fn ready(&self) -> impl Future<Output = ()> + Send {
        (**self).ready()
    }
}

impl<T: Arbiter> Arbiter for Arc<T> {
    type Bounced = T::Bounced;

    fn bounce(&self, target: &str) -> Self::Bounced {
        (**self).bounce(target)
    }
}
