//! Accessor whose calls are relayed through the arbiter.

use tether_types::{ConfiguredRole, DynamicRole};
use tether_wire::{Query, RequestPayload, ResponsePayload};
use tracing::debug;

use crate::NodeState;
use crate::error::StateResult;
use crate::remote::{
    RemoteState, expect_configured_role, expect_dynamic_role, expect_synced, wait_until_ready,
};

/// A participant queried indirectly: the arbiter performs each call against
/// `target` and relays the result.
///
/// Errors come back from the query itself: either the arbiter is unreachable
/// (transport error) or the arbiter could not reach the target
/// ([`StateError::Remote`](crate::StateError::Remote) with
/// [`ErrorCode::Unreachable`](tether_wire::ErrorCode::Unreachable)).
///
/// A bounced call spans two hops, so its deadline is twice the arbiter's
/// per-call timeout; the arbiter's own hop to the target is bounded by the
/// arbiter's relay timeout.
#[derive(Debug, Clone)]
pub struct BouncedState {
    via: RemoteState,
    target: String,
}

impl BouncedState {
    pub fn new(via: RemoteState, target: impl Into<String>) -> Self {
        let deadline = via.timeout() * 2;
        Self {
            via: via.with_timeout(deadline),
            target: target.into(),
        }
    }

    /// Address of the arbiter relaying the calls.
    pub fn arbiter(&self) -> &str {
        self.via.location()
    }

    async fn query(&self, query: Query) -> StateResult<ResponsePayload> {
        debug!(arbiter = self.arbiter(), target = %self.target, query = query.name(), "bouncing call");
        self.via
            .call(RequestPayload::Bounce {
                target: self.target.clone(),
                query,
            })
            .await
    }
}

impl NodeState for BouncedState {
    async fn dynamic_role(&self) -> StateResult<DynamicRole> {
        expect_dynamic_role(self.query(Query::DynamicRole).await?)
    }

    async fn configured_role(&self) -> StateResult<ConfiguredRole> {
        expect_configured_role(self.query(Query::ConfiguredRole).await?)
    }

    async fn has_synced(&self) -> StateResult<bool> {
        expect_synced(self.query(Query::HasSynced).await?)
    }

    fn location(&self) -> &str {
        &self.target
    }

    async fn ready(&self) {
        wait_until_ready(&self.target, self.via.ready_retry(), || {
            self.query(Query::Ping)
        })
        .await;
    }
}
