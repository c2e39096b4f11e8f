//! Typed payload layouts for the three message kinds.
//!
//! ```text
//! Connect  = [channelAddrLen: u16][channelAddr: bytes][streamId: i32]
//! Request  = [id: u64][reqLen: u16][req: bytes]
//! Response = [id: u64][resLen: u16][res: bytes]
//! ```
//!
//! Strings are UTF-8 with a u16 little-endian length prefix.

use bytes::{Buf, BufMut};

use super::wire_format::{type_tags, Header, SCHEMA_VERSION};
use crate::error::{RendezvousError, Result};

/// Declares where the server must publish responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectMessage {
    /// Address of the client's inbound channel.
    pub response_channel: String,
    /// Stream id on that channel.
    pub response_stream_id: i32,
}

/// One request; `id` is the correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub id: u64,
    pub req: String,
}

/// Echoes the triggering request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub id: u64,
    pub res: String,
}

/// Any message this implementation can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Connect(ConnectMessage),
    Request(RequestMessage),
    Response(ResponseMessage),
}

/// Result of decoding a payload.
///
/// An unrecognized type tag is not a decode failure; the caller decides
/// whether to ignore or escalate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    Unknown { type_tag: u16, version: u16 },
}

impl ConnectMessage {
    pub fn new(response_channel: impl Into<String>, response_stream_id: i32) -> Self {
        Self {
            response_channel: response_channel.into(),
            response_stream_id,
        }
    }
}

impl RequestMessage {
    pub fn new(id: u64, req: impl Into<String>) -> Self {
        Self { id, req: req.into() }
    }
}

impl ResponseMessage {
    pub fn new(id: u64, res: impl Into<String>) -> Self {
        Self { id, res: res.into() }
    }
}

impl Message {
    /// The type tag written in this message's header.
    pub fn type_tag(&self) -> u16 {
        match self {
            Message::Connect(_) => type_tags::CONNECT,
            Message::Request(_) => type_tags::REQUEST,
            Message::Response(_) => type_tags::RESPONSE,
        }
    }

    /// Encoded payload length in bytes (header excluded).
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Connect(m) => 2 + m.response_channel.len() + 4,
            Message::Request(m) => 8 + 2 + m.req.len(),
            Message::Response(m) => 8 + 2 + m.res.len(),
        }
    }

    /// Header describing this message's payload.
    pub fn header(&self) -> Result<Header> {
        let len = self.encoded_len();
        let payload_length = u32::try_from(len).map_err(|_| RendezvousError::FieldTooLong {
            field: "payload",
            len,
        })?;
        Ok(Header::new(self.type_tag(), payload_length, SCHEMA_VERSION))
    }

    /// Append the payload (no header) to a buffer.
    pub fn encode_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Message::Connect(m) => {
                put_str(buf, "channel", &m.response_channel)?;
                buf.put_i32_le(m.response_stream_id);
            }
            Message::Request(m) => {
                buf.put_u64_le(m.id);
                put_str(buf, "req", &m.req)?;
            }
            Message::Response(m) => {
                buf.put_u64_le(m.id);
                put_str(buf, "res", &m.res)?;
            }
        }
        Ok(())
    }
}

impl From<ConnectMessage> for Message {
    fn from(m: ConnectMessage) -> Self {
        Message::Connect(m)
    }
}

impl From<RequestMessage> for Message {
    fn from(m: RequestMessage) -> Self {
        Message::Request(m)
    }
}

impl From<ResponseMessage> for Message {
    fn from(m: ResponseMessage) -> Self {
        Message::Response(m)
    }
}

/// Decode a typed payload.
///
/// `payload` must be exactly the bytes the header declared. Every byte must
/// be consumed by the typed layout, otherwise the frame is rejected.
pub fn decode_payload(type_tag: u16, payload: &[u8], version: u16) -> Result<Decoded> {
    let mut cursor = payload;
    let message = match type_tag {
        type_tags::CONNECT => {
            let response_channel = get_str(&mut cursor, "channel")?;
            ensure_remaining(&cursor, 4)?;
            Message::Connect(ConnectMessage {
                response_channel,
                response_stream_id: cursor.get_i32_le(),
            })
        }
        type_tags::REQUEST => {
            ensure_remaining(&cursor, 8)?;
            let id = cursor.get_u64_le();
            Message::Request(RequestMessage {
                id,
                req: get_str(&mut cursor, "req")?,
            })
        }
        type_tags::RESPONSE => {
            ensure_remaining(&cursor, 8)?;
            let id = cursor.get_u64_le();
            Message::Response(ResponseMessage {
                id,
                res: get_str(&mut cursor, "res")?,
            })
        }
        _ => return Ok(Decoded::Unknown { type_tag, version }),
    };

    if cursor.has_remaining() {
        return Err(RendezvousError::PayloadLengthMismatch {
            declared: payload.len(),
            actual: payload.len() - cursor.remaining(),
        });
    }
    Ok(Decoded::Message(message))
}

fn put_str<B: BufMut>(buf: &mut B, field: &'static str, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| RendezvousError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.put_u16_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_str(cursor: &mut &[u8], field: &'static str) -> Result<String> {
    ensure_remaining(cursor, 2)?;
    let len = cursor.get_u16_le() as usize;
    ensure_remaining(cursor, len)?;
    let raw = cursor[..len].to_vec();
    cursor.advance(len);
    String::from_utf8(raw).map_err(|_| RendezvousError::InvalidUtf8(field))
}

fn ensure_remaining(cursor: &&[u8], needed: usize) -> Result<()> {
    if cursor.remaining() < needed {
        return Err(RendezvousError::Truncated {
            needed,
            available: cursor.remaining(),
        });
    }
    Ok(())
}
