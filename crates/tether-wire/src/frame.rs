//! Length-prefixed, checksummed frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Frame magic: ASCII `TTHR`.
pub const MAGIC: u32 = 0x5454_4852;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4 + 2 + 4 + 4;

/// Largest payload accepted in a single frame (64 KiB).
///
/// Every message in the protocol is a handful of bytes; anything near this
/// limit is garbage or an attack.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Decodes a header from the front of `buf`, advancing it.
    ///
    /// Performs no validation beyond length; see [`FrameHeader::validate`].
    pub fn decode(buf: &mut &[u8]) -> WireResult<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WireError::TruncatedHeader(buf.len()));
        }

        Ok(Self {
            magic: buf.get_u32(),
            version: buf.get_u16(),
            length: buf.get_u32(),
            checksum: buf.get_u32(),
        })
    }

    /// Checks magic, version, and declared length.
    pub fn validate(&self) -> WireResult<()> {
        if self.magic != MAGIC {
            return Err(WireError::InvalidMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        if self.length as usize > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                size: self.length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.magic);
        buf.put_u16(self.version);
        buf.put_u32(self.length);
        buf.put_u32(self.checksum);
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    fn header(&self) -> FrameHeader {
        FrameHeader {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            length: self.payload.len() as u32,
            checksum: crc32fast::hash(&self.payload),
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        self.header().encode(buf);
        buf.put_slice(&self.payload);
    }

    /// Encodes the frame into a fresh buffer.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` until a complete frame is buffered. On success the
    /// frame's bytes are removed from `buf`. Header errors are reported as
    /// soon as the header is complete, without waiting for the payload.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(&mut &buf[..FRAME_HEADER_SIZE])?;
        header.validate()?;

        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        let actual = crc32fast::hash(&payload);
        if actual != header.checksum {
            return Err(WireError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        Ok(Some(Self { payload }))
    }
}
