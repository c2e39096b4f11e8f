//! Wire format encoding and decoding of the frame header.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────┬────────────┬──────────┐
//! │ Type tag │ Payload len│ Version  │
//! │ 2 bytes  │ 4 bytes    │ 2 bytes  │
//! │ uint16 LE│ uint32 LE  │ uint16 LE│
//! └──────────┴────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. Every frame on the wire is
//! `Header || Payload`, and the payload length lets a receiver locate the
//! payload without look-ahead.

use bytes::{Buf, BufMut};

use crate::error::{RendezvousError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Schema version written by this implementation.
pub const SCHEMA_VERSION: u16 = 1;

/// Stable type tags, one per message kind. Never reused across kinds.
pub mod type_tags {
    /// Client declares where responses must be published.
    pub const CONNECT: u16 = 1;
    /// Client request carrying a correlation id.
    pub const REQUEST: u16 = 2;
    /// Server response echoing the request id.
    pub const RESPONSE: u16 = 3;

    /// Human-readable name for a tag, for logging.
    pub fn name(tag: u16) -> &'static str {
        match tag {
            CONNECT => "connect",
            REQUEST => "request",
            RESPONSE => "response",
            _ => "unknown",
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind (see `type_tags`).
    pub type_tag: u16,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// Schema version of the payload layout.
    pub version: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(type_tag: u16, payload_length: u32, version: u16) -> Self {
        Self {
            type_tag,
            payload_length,
            version,
        }
    }

    /// Encoded length of the header; fixed and known to both peers.
    #[inline]
    pub const fn encoded_len(&self) -> usize {
        HEADER_SIZE
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rendezvous_rpc::protocol::{type_tags, Header, SCHEMA_VERSION};
    ///
    /// let header = Header::new(type_tags::REQUEST, 14, SCHEMA_VERSION);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// assert_eq!(bytes[0], 2);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = &mut buf[..];
        self.encode_into(&mut cursor);
        buf
    }

    /// Append the header to a buffer.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.type_tag);
        buf.put_u32_le(self.payload_length);
        buf.put_u16_le(self.version);
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use rendezvous_rpc::protocol::Header;
    ///
    /// let bytes = [3, 0, 20, 0, 0, 0, 1, 0];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.type_tag, 3);
    /// assert_eq!(header.payload_length, 20);
    /// assert_eq!(header.version, 1);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut cursor = &buf[..HEADER_SIZE];
        Some(Self {
            type_tag: cursor.get_u16_le(),
            payload_length: cursor.get_u32_le(),
            version: cursor.get_u16_le(),
        })
    }

    /// Total frame length (header + payload) this header describes.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// Check whether the tag names a message kind this implementation knows.
    #[inline]
    pub fn is_known_type(&self) -> bool {
        matches!(
            self.type_tag,
            type_tags::CONNECT | type_tags::REQUEST | type_tags::RESPONSE
        )
    }
}

/// Decode a header, reporting how many bytes were missing on failure.
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf).ok_or(RendezvousError::Truncated {
        needed: HEADER_SIZE,
        available: buf.len(),
    })
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}
