//! Protocol module - wire format, message layouts, and framing.
//!
//! This module implements the binary protocol shared by client and server:
//! - 8-byte header encoding/decoding with a type tag per message kind
//! - Connect, Request and Response payload layouts
//! - A reusable frame encoder and frame decoding helpers

mod codec;
mod message;
mod wire_format;

pub use codec::{decode_frame, split_frame, FrameEncoder, DEFAULT_SCRATCH_CAPACITY};
pub use message::{
    decode_payload, ConnectMessage, Decoded, Message, RequestMessage, ResponseMessage,
};
pub use wire_format::{
    decode_header, encode_header, type_tags, Header, HEADER_SIZE, SCHEMA_VERSION,
};
