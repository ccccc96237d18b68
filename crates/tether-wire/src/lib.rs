//! # tether-wire: RPC protocol for `tether`
//!
//! Every node (database nodes and the arbiter) exposes the same small set of
//! calls over TCP. Messages travel inside checksummed frames:
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬──────────┬─────────────────────┐
//! │  magic   │ version │  length  │  crc32   │  postcard payload   │
//! │ "TTHR"   │   u16   │   u32    │   u32    │  (length bytes)     │
//! └──────────┴─────────┴──────────┴──────────┴─────────────────────┘
//! ```
//!
//! All header integers are big-endian. A request carries either a direct
//! [`Query`] against the receiving node, or a [`RequestPayload::Bounce`] asking
//! the receiver to run the query against a third node and relay the answer.

mod codec;
mod error;
mod frame;
mod message;


pub use codec::FrameCodec;
pub use error::{WireError, WireResult};
pub use frame::{FRAME_HEADER_SIZE, Frame, FrameHeader, MAGIC, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
pub use message::{
    ErrorCode, ErrorResponse, Query, Request, RequestId, RequestPayload, Response,
    ResponsePayload,
};
