//! Frame encoder and decoder.
//!
//! The encoder owns a reusable scratch buffer, so a single owning task can
//! encode every outbound frame without allocating once the buffer has grown.
//!
//! # Example
//!
//! ```
//! use rendezvous_rpc::protocol::{decode_frame, Decoded, FrameEncoder, Message, RequestMessage};
//!
//! let mut encoder = FrameEncoder::new();
//! let msg = Message::from(RequestMessage::new(0, "ping"));
//! let frame = encoder.encode(&msg).unwrap().to_vec();
//!
//! assert_eq!(decode_frame(&frame).unwrap(), Decoded::Message(msg));
//! ```

use bytes::BytesMut;

use super::message::{decode_payload, Decoded, Message};
use super::wire_format::{decode_header, Header, HEADER_SIZE};
use crate::error::{RendezvousError, Result};

/// Default scratch capacity, enough for typical request/response frames.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 512;

/// Encodes messages as `Header || Payload` into a reused buffer.
///
/// Not shared across tasks; each session owns one.
#[derive(Debug)]
pub struct FrameEncoder {
    scratch: BytesMut,
}

impl FrameEncoder {
    /// Create an encoder with the default scratch capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_CAPACITY)
    }

    /// Create an encoder with a custom initial scratch capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scratch: BytesMut::with_capacity(capacity),
        }
    }

    /// Encode a full frame. The returned slice is valid until the next call.
    pub fn encode(&mut self, message: &Message) -> Result<&[u8]> {
        let header = message.header()?;
        self.scratch.clear();
        self.scratch.reserve(header.frame_len());
        header.encode_into(&mut self.scratch);
        message.encode_payload(&mut self.scratch)?;
        debug_assert_eq!(self.scratch.len(), header.frame_len());
        Ok(&self.scratch[..])
    }

    /// Length of the most recently encoded frame.
    pub fn len(&self) -> usize {
        self.scratch.len()
    }

    /// True when nothing has been encoded yet (or the last encode failed early).
    pub fn is_empty(&self) -> bool {
        self.scratch.is_empty()
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a frame into its header and exactly the payload bytes it declares.
pub fn split_frame(frame: &[u8]) -> Result<(Header, &[u8])> {
    let header = decode_header(frame)?;
    let end = header.frame_len();
    if frame.len() < end {
        return Err(RendezvousError::Truncated {
            needed: end,
            available: frame.len(),
        });
    }
    Ok((header, &frame[HEADER_SIZE..end]))
}

/// Decode a complete frame (header + typed payload).
pub fn decode_frame(frame: &[u8]) -> Result<Decoded> {
    let (header, payload) = split_frame(frame)?;
    decode_payload(header.type_tag, payload, header.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        type_tags, ConnectMessage, RequestMessage, ResponseMessage, SCHEMA_VERSION,
    };

    #[test]
    fn test_header_declares_payload_length() {
        let mut encoder = FrameEncoder::new();
        let messages = [
            Message::from(ConnectMessage::new("inbound://c1", 7)),
            Message::from(RequestMessage::new(0, "ping")),
            Message::from(ResponseMessage::new(0, "pong-ish")),
        ];

        for msg in &messages {
            let frame = encoder.encode(msg).unwrap();
            let (header, payload) = split_frame(frame).unwrap();
            assert_eq!(header.payload_length as usize, payload.len());
            assert_eq!(header.payload_length as usize, frame.len() - HEADER_SIZE);
            assert_eq!(header.type_tag, msg.type_tag());
            assert_eq!(header.version, SCHEMA_VERSION);
        }
    }

    #[test]
    fn test_encoder_reuses_scratch() {
        let mut encoder = FrameEncoder::with_capacity(16);
        let long = Message::from(RequestMessage::new(1, "a".repeat(100)));
        let short = Message::from(RequestMessage::new(2, "b"));

        let first_len = encoder.encode(&long).unwrap().len();
        assert_eq!(first_len, HEADER_SIZE + 110);

        // A shorter frame must not carry leftovers from the longer one
        let frame = encoder.encode(&short).unwrap().to_vec();
        assert_eq!(frame.len(), HEADER_SIZE + 11);
        assert_eq!(encoder.len(), frame.len());
        assert_eq!(decode_frame(&frame).unwrap(), Decoded::Message(short));
    }

    #[test]
    fn test_decode_truncated_frame() {
        let mut encoder = FrameEncoder::new();
        let frame = encoder
            .encode(&Message::from(ResponseMessage::new(3, "pong")))
            .unwrap()
            .to_vec();

        let result = decode_frame(&frame[..frame.len() - 2]);
        assert!(matches!(result, Err(RendezvousError::Truncated { .. })));

        let result = decode_frame(&frame[..3]);
        assert!(matches!(
            result,
            Err(RendezvousError::Truncated {
                needed: HEADER_SIZE,
                available: 3
            })
        ));
    }

    #[test]
    fn test_decode_ignores_bytes_past_declared_length() {
        let mut encoder = FrameEncoder::new();
        let msg = Message::from(RequestMessage::new(5, "req"));
        let mut frame = encoder.encode(&msg).unwrap().to_vec();
        frame.extend_from_slice(&[0xAA, 0xBB]);

        assert_eq!(decode_frame(&frame).unwrap(), Decoded::Message(msg));
    }

    #[test]
    fn test_decode_unknown_frame() {
        let header = Header::new(0x7777, 3, SCHEMA_VERSION);
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(b"abc");

        assert_eq!(
            decode_frame(&frame).unwrap(),
            Decoded::Unknown {
                type_tag: 0x7777,
                version: SCHEMA_VERSION
            }
        );
    }

    #[test]
    fn test_header_smaller_than_typed_payload() {
        // Header claims fewer bytes than the request layout needs
        let mut frame = Header::new(type_tags::REQUEST, 4, SCHEMA_VERSION)
            .encode()
            .to_vec();
        frame.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let result = decode_frame(&frame);
        assert!(matches!(result, Err(RendezvousError::Truncated { .. })));
    }
}
