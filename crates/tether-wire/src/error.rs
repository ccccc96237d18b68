//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame does not start with the protocol magic.
    #[error("invalid frame magic: {0:#010x}")]
    InvalidMagic(u32),

    /// Peer speaks a protocol version we do not understand.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Declared payload exceeds the frame size limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Payload bytes do not match the header checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Not enough bytes to decode a header.
    #[error("truncated frame header: {0} bytes")]
    TruncatedHeader(usize),

    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Underlying transport error (surfaced through the codec).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
