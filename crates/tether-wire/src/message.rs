//! Request and response messages.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tether_types::{ConfiguredRole, DynamicRole};

use crate::error::WireResult;
use crate::frame::Frame;

/// Correlates a response with the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A question about a node's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// Liveness probe.
    Ping,
    /// Current dynamic role.
    DynamicRole,
    /// Static configured role.
    ConfiguredRole,
    /// Whether the node's replica is caught up.
    HasSynced,
}

impl Query {
    pub fn name(self) -> &'static str {
        match self {
            Query::Ping => "ping",
            Query::DynamicRole => "dynamic_role",
            Query::ConfiguredRole => "configured_role",
            Query::HasSynced => "has_synced",
        }
    }
}

/// Body of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Answer the query about the receiving node.
    Query(Query),
    /// Run the query against `target` on the caller's behalf and relay the
    /// answer.
    Bounce { target: String, query: Query },
}

/// A request frame body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(id: RequestId, payload: RequestPayload) -> Self {
        Self { id, payload }
    }

    pub fn to_frame(&self) -> WireResult<Frame> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Frame::new(Bytes::from(bytes)))
    }

    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The request was malformed or not allowed.
    InvalidRequest,
    /// The node failed to read its own state.
    Internal,
    /// A bounced call could not reach its target.
    Unreachable,
    /// The frame used a protocol version this node does not speak.
    UnsupportedVersion,
}

/// An error answer from a reachable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

/// Body of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Pong,
    DynamicRole(DynamicRole),
    ConfiguredRole(ConfiguredRole),
    Synced(bool),
    Error(ErrorResponse),
}

/// A response frame body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(id: RequestId, payload: ResponsePayload) -> Self {
        Self { id, payload }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn to_frame(&self) -> WireResult<Frame> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Frame::new(Bytes::from(bytes)))
    }

    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(postcard::from_bytes(&frame.payload)?)
    }
}
