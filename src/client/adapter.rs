//! Inbound fragment handling for the client session.

use crate::protocol::{decode_frame, type_tags, Decoded, Message, ResponseMessage};

/// Decodes fragments arriving on the client's inbound channel.
///
/// Only a response carrying the outstanding request id is surfaced. Anything
/// else is logged and counted, never escalated.
#[derive(Debug, Default)]
pub struct ClientAdapter {
    ignored: u64,
}

impl ClientAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one fragment.
    ///
    /// `expected` is the id of the outstanding request, or `None` when a
    /// response has already been matched in this poll.
    pub fn on_fragment(&mut self, fragment: &[u8], expected: Option<u64>) -> Option<ResponseMessage> {
        let decoded = match decode_frame(fragment) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("dropping malformed frame: {}", e);
                self.ignored += 1;
                return None;
            }
        };

        match decoded {
            Decoded::Message(Message::Response(response)) if Some(response.id) == expected => {
                Some(response)
            }
            Decoded::Message(Message::Response(response)) => {
                tracing::warn!(
                    "ignoring response with unexpected id: {} (outstanding: {:?})",
                    response.id,
                    expected
                );
                self.ignored += 1;
                None
            }
            Decoded::Message(other) => {
                tracing::warn!(
                    "unknown message, type tag: {} ({})",
                    other.type_tag(),
                    type_tags::name(other.type_tag())
                );
                self.ignored += 1;
                None
            }
            Decoded::Unknown { type_tag, version } => {
                tracing::warn!("unknown message, type tag: {}, version: {}", type_tag, version);
                self.ignored += 1;
                None
            }
        }
    }

    /// Fragments that did not satisfy a request.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameEncoder, Header, RequestMessage, SCHEMA_VERSION};

    fn frame(message: Message) -> Vec<u8> {
        FrameEncoder::new().encode(&message).unwrap().to_vec()
    }

    #[test]
    fn test_matching_response_is_surfaced() {
        let mut adapter = ClientAdapter::new();
        let bytes = frame(Message::from(ResponseMessage::new(4, "server time 1")));

        let response = adapter.on_fragment(&bytes, Some(4)).unwrap();
        assert_eq!(response, ResponseMessage::new(4, "server time 1"));
        assert_eq!(adapter.ignored(), 0);
    }

    #[test]
    fn test_mismatched_id_is_ignored() {
        let mut adapter = ClientAdapter::new();
        let bytes = frame(Message::from(ResponseMessage::new(3, "late")));

        assert!(adapter.on_fragment(&bytes, Some(4)).is_none());
        assert!(adapter.on_fragment(&bytes, None).is_none());
        assert_eq!(adapter.ignored(), 2);
    }

    #[test]
    fn test_non_response_frames_are_ignored() {
        let mut adapter = ClientAdapter::new();
        let request = frame(Message::from(RequestMessage::new(0, "ping")));
        let mut unknown = Header::new(0x0F0F, 2, SCHEMA_VERSION).encode().to_vec();
        unknown.extend_from_slice(&[1, 2]);

        assert!(adapter.on_fragment(&request, Some(0)).is_none());
        assert!(adapter.on_fragment(&unknown, Some(0)).is_none());
        assert!(adapter.on_fragment(&[0xFF, 0x01], Some(0)).is_none());
        assert_eq!(adapter.ignored(), 3);
    }
}
