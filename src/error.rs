//! Error types for rendezvous-rpc.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all rendezvous-rpc operations.
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Buffer ended before a complete header or field could be read.
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Header declared a payload length that does not match the typed payload.
    #[error("Payload length mismatch: header declares {declared}, payload uses {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },

    /// A variable-length field does not fit in its u16 length prefix.
    #[error("Field `{field}` too long: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },

    /// A string field was not valid UTF-8.
    #[error("Field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Protocol error (unexpected message, missing rendezvous, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport reports the channel as closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The session's closed flag was raised while waiting.
    #[error("Session closed")]
    SessionClosed,

    /// A hardened wait gave up.
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: &'static str, after: Duration },
}

impl RendezvousError {
    /// Terminal errors end the agent; everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RendezvousError::ChannelClosed(_) | RendezvousError::SessionClosed
        )
    }
}

/// Result type alias using RendezvousError.
pub type Result<T> = std::result::Result<T, RendezvousError>;
