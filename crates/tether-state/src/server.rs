//! RPC endpoint exposing a node's [`LocalState`].
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐
//! │   Listener   │ → │ Connection tasks │ → │ RequestHandler │ → LocalState
//! │    (TCP)     │   │ (one per socket) │   │                │ → RemoteState (bounce)
//! └──────────────┘   └──────────────────┘   └────────────────┘
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_wire::{
    ErrorCode, FrameCodec, Query, Request, RequestId, RequestPayload, Response, ResponsePayload,
    WireError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::NodeState;
use crate::error::{StateError, StateResult};
use crate::local::LocalState;
use crate::remote::RemoteState;

/// Answers requests on behalf of the local node.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    local: LocalState,
    /// Bound on the hop from this node to the target of a bounce.
    relay_timeout: Duration,
}

impl RequestHandler {
    pub fn new(local: LocalState, relay_timeout: Duration) -> Self {
        Self {
            local,
            relay_timeout,
        }
    }

    /// Handles a request and returns a response.
    #[instrument(skip_all, fields(request_id = request.id.0))]
    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id;
        match self.handle_inner(request.payload).await {
            Ok(payload) => Response::new(id, payload),
            Err((code, message)) => Response::error(id, code, message),
        }
    }

    async fn handle_inner(
        &self,
        payload: RequestPayload,
    ) -> Result<ResponsePayload, (ErrorCode, String)> {
        match payload {
            RequestPayload::Query(query) => {
                debug!(op = query.name(), "local query");
                self.answer_locally(query)
                    .await
                    .map_err(|e| (ErrorCode::Internal, e.to_string()))
            }
            RequestPayload::Bounce { target, query } => {
                debug!(op = query.name(), %target, "bounced query");
                self.relay(&target, query).await
            }
        }
    }

    async fn answer_locally(&self, query: Query) -> StateResult<ResponsePayload> {
        Ok(match query {
            Query::Ping => ResponsePayload::Pong,
            Query::DynamicRole => ResponsePayload::DynamicRole(self.local.dynamic_role().await?),
            Query::ConfiguredRole => {
                ResponsePayload::ConfiguredRole(self.local.configured_role().await?)
            }
            Query::HasSynced => ResponsePayload::Synced(self.local.has_synced().await?),
        })
    }

    /// Runs `query` against `target` and relays its answer.
    ///
    /// Only a direct query is relayed, so a bounce can never chain through a
    /// second arbiter.
    async fn relay(
        &self,
        target: &str,
        query: Query,
    ) -> Result<ResponsePayload, (ErrorCode, String)> {
        if target == self.local.location() {
            return self
                .answer_locally(query)
                .await
                .map_err(|e| (ErrorCode::Internal, e.to_string()));
        }

        let remote = RemoteState::new(target, self.relay_timeout);
        match remote.query(query).await {
            Ok(payload) => Ok(payload),
            Err(StateError::Remote { code, message }) => Err((code, message)),
            Err(e) => {
                debug!(%target, error = %e, "bounce target unreachable");
                Err((ErrorCode::Unreachable, e.to_string()))
            }
        }
    }
}

/// TCP server answering state queries.
pub struct RpcServer {
    listener: TcpListener,
    handler: RequestHandler,
}

impl RpcServer {
    /// Binds the server to `addr`.
    pub async fn bind(addr: &str, handler: RequestHandler) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) {
        let addr = self
            .local_addr()
            .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
        info!(%addr, "rpc server listening");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(%addr, "rpc server stopped");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = self.handler.clone();
                        let conn_cancel = cancel.child_token();
                        tokio::spawn(
                            serve_connection(stream, handler, conn_cancel)
                                .instrument(info_span!("rpc_connection", %peer)),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                },
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: RequestHandler, cancel: CancellationToken) {
    stream.set_nodelay(true).ok();
    let mut framed = Framed::new(stream, FrameCodec);

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            next = framed.next() => match next {
                Some(Ok(frame)) => frame,
                Some(Err(WireError::UnsupportedVersion(version))) => {
                    debug!(version, "rejecting unsupported protocol version");
                    let response = Response::error(
                        RequestId::new(0),
                        ErrorCode::UnsupportedVersion,
                        format!("protocol version {version} is not supported"),
                    );
                    if let Ok(frame) = response.to_frame() {
                        framed.send(frame).await.ok();
                    }
                    return;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "dropping connection on bad frame");
                    return;
                }
                None => return,
            },
        };

        // An intact frame with an undecodable body is answered, the stream
        // itself is still in sync
        let response = match Request::from_frame(&frame) {
            Ok(request) => handler.handle(request).await,
            Err(e) => {
                debug!(error = %e, "undecodable request");
                Response::error(RequestId::new(0), ErrorCode::InvalidRequest, e.to_string())
            }
        };

        let sent = match response.to_frame() {
            Ok(frame) => framed.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            debug!(error = %e, "failed to send response");
            return;
        }
    }
}
