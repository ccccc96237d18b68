//! Accessor for a participant reached over RPC.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_types::{ConfiguredRole, DynamicRole};
use tether_wire::{FrameCodec, Query, Request, RequestId, RequestPayload, Response, ResponsePayload};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::{Arbiter, BouncedState, NodeState};

/// Default bound on a single remote call, connect included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default pause between readiness probes.
pub const DEFAULT_READY_RETRY: Duration = Duration::from_secs(1);

/// A participant reached over the network.
///
/// Every call opens its own connection and is bounded by `timeout` end to end,
/// so one stuck participant cannot stall a recheck for longer than that.
#[derive(Debug, Clone)]
pub struct RemoteState {
    address: String,
    timeout: Duration,
    ready_retry: Duration,
    next_id: Arc<AtomicU64>,
}

impl RemoteState {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            ready_retry: DEFAULT_READY_RETRY,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Sets the pause between readiness probes.
    pub fn with_ready_retry(mut self, retry: Duration) -> Self {
        self.ready_retry = retry;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn ready_retry(&self) -> Duration {
        self.ready_retry
    }

    /// Asks the participant a question about itself.
    pub async fn query(&self, query: Query) -> StateResult<ResponsePayload> {
        self.call(RequestPayload::Query(query)).await
    }

    /// Sends one request and waits for its response.
    ///
    /// An error payload from the participant becomes [`StateError::Remote`];
    /// everything else that goes wrong is a transport error.
    pub(crate) async fn call(&self, payload: RequestPayload) -> StateResult<ResponsePayload> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(id, payload);

        let response = tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| StateError::Timeout {
                addr: self.address.clone(),
                after: self.timeout,
            })??;

        if response.id != id {
            return Err(StateError::UnexpectedResponse {
                query: "request id",
                got: format!("response for request {}", response.id),
            });
        }

        match response.payload {
            ResponsePayload::Error(err) => Err(StateError::Remote {
                code: err.code,
                message: err.message,
            }),
            payload => Ok(payload),
        }
    }

    async fn exchange(&self, request: &Request) -> StateResult<Response> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| StateError::Unreachable {
                addr: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();

        let mut framed = Framed::new(stream, FrameCodec);
        framed.send(request.to_frame()?).await?;

        match framed.next().await {
            Some(frame) => Ok(Response::from_frame(&frame?)?),
            None => Err(StateError::ConnectionClosed {
                addr: self.address.clone(),
            }),
        }
    }
}

impl NodeState for RemoteState {
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
        &self.address
    }

    async fn ready(&self) {
        wait_until_ready(&self.address, self.ready_retry, || self.query(Query::Ping)).await;
    }
}

impl Arbiter for RemoteState {
    type Bounced = BouncedState;

    fn bounce(&self, target: &str) -> BouncedState {
        BouncedState::new(self.clone(), target)
    }
}

/// Probes until `ping` answers with a pong.
pub(crate) async fn wait_until_ready<F, Fut>(address: &str, retry: Duration, ping: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = StateResult<ResponsePayload>>,
{
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match ping().await {
            Ok(ResponsePayload::Pong) => {
                debug!(address, attempts, "participant is ready");
                return;
            }
            Ok(other) => {
                debug!(address, attempts, response = ?other, "unexpected ping response");
            }
            Err(e) => {
                debug!(address, attempts, error = %e, "participant not ready");
            }
        }
        tokio::time::sleep(retry).await;
    }
}

pub(crate) fn expect_dynamic_role(payload: ResponsePayload) -> StateResult<DynamicRole> {
    match payload {
        ResponsePayload::DynamicRole(role) => Ok(role),
        other => Err(unexpected(Query::DynamicRole, &other)),
    }
}

pub(crate) fn expect_configured_role(payload: ResponsePayload) -> StateResult<ConfiguredRole> {
    match payload {
        ResponsePayload::ConfiguredRole(role) => Ok(role),
        other => Err(unexpected(Query::ConfiguredRole, &other)),
    }
}

pub(crate) fn expect_synced(payload: ResponsePayload) -> StateResult<bool> {
    match payload {
        ResponsePayload::Synced(synced) => Ok(synced),
        other => Err(unexpected(Query::HasSynced, &other)),
    }
}

fn unexpected(query: Query, got: &ResponsePayload) -> StateError {
    StateError::UnexpectedResponse {
        query: query.name(),
        got: format!("{got:?}"),
    }
}
