//! Per-fragment dispatch for the server.

use crate::backpressure::Backpressure;
use crate::error::{RendezvousError, Result};
use crate::idle::IdleStrategy;
use crate::protocol::{
    decode_frame, ConnectMessage, Decoded, FrameEncoder, Message, RequestMessage, ResponseMessage,
};
use crate::transport::{Channel, Publication, Transport};

type Responder = Box<dyn FnMut(&RequestMessage) -> String + Send>;

/// Demultiplexes inbound frames by type tag.
///
/// A Connect performs the rendezvous: the dispatcher publishes every later
/// response on the channel it names. A new Connect replaces the previous
/// response channel, so only one client is answered at a time.
pub struct ServerDispatcher<T: Transport, I> {
    transport: T,
    publication: Option<T::Publication>,
    encoder: FrameEncoder,
    backpressure: Backpressure<I>,
    responder: Responder,
    requests_served: u64,
}

impl<T: Transport, I: IdleStrategy> ServerDispatcher<T, I> {
    /// Dispatcher with no response channel and the default responder.
    pub fn new(transport: T, backpressure: Backpressure<I>) -> Self {
        Self {
            transport,
            publication: None,
            encoder: FrameEncoder::new(),
            backpressure,
            responder: Box::new(|_| format!("server time {}", crate::unix_millis())),
            requests_served: 0,
        }
    }

    /// Replace the response payload source.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&RequestMessage) -> String + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Channel responses are currently published on.
    pub fn response_channel(&self) -> Option<&Channel> {
        self.publication.as_ref().map(|p| p.channel())
    }

    /// Whether a response channel is open.
    pub fn is_rendezvous_complete(&self) -> bool {
        self.publication.is_some()
    }

    /// Requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Handle one complete frame.
    ///
    /// Malformed frames, unknown tags and requests that arrive before the
    /// rendezvous are logged and dropped. Only a closed session or a
    /// timed-out wait is returned as an error.
    pub async fn on_fragment(&mut self, fragment: &[u8]) -> Result<()> {
        let decoded = match decode_frame(fragment) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("dropping malformed frame: {}", e);
                return Ok(());
            }
        };

        match decoded {
            Decoded::Message(Message::Connect(connect)) => self.on_connect(connect).await,
            Decoded::Message(Message::Request(request)) => self.on_request(request).await,
            Decoded::Message(Message::Response(response)) => {
                tracing::warn!("unknown message, unexpected response id: {}", response.id);
                Ok(())
            }
            Decoded::Unknown { type_tag, version } => {
                tracing::warn!("unknown message, type tag: {}, version: {}", type_tag, version);
                Ok(())
            }
        }
    }

    async fn on_connect(&mut self, connect: ConnectMessage) -> Result<()> {
        let channel = Channel::new(connect.response_channel, connect.response_stream_id);

        if let Some(mut previous) = self.publication.take() {
            tracing::info!("replacing response channel {} with {}", previous.channel(), channel);
            previous.close();
        }

        let publication = self.transport.add_publication(&channel)?;
        // on failure the new publication is dropped, which closes it
        self.backpressure
            .await_connected("outbound connect", || publication.is_connected())
            .await?;

        tracing::info!("outbound connected, channel: {}", channel);
        self.publication = Some(publication);
        Ok(())
    }

    async fn on_request(&mut self, request: RequestMessage) -> Result<()> {
        tracing::info!("request received, id: {}, req: {}", request.id, request.req);

        let Some(publication) = self.publication.as_mut() else {
            tracing::warn!("request {} arrived before rendezvous, dropping", request.id);
            return Ok(());
        };

        let response = ResponseMessage::new(request.id, (self.responder)(&request));
        let frame = self.encoder.encode(&Message::Response(response.clone()))?;

        match self.backpressure.send(publication, frame).await {
            Ok(_) => {}
            Err(RendezvousError::ChannelClosed(channel)) => {
                // the client went away; wait for the next Connect
                tracing::warn!("response channel {} closed, dropping response {}", channel, response.id);
                self.publication = None;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.requests_served += 1;
        tracing::info!("response sent, id: {}, res: {}", response.id, response.res);
        Ok(())
    }

    /// Release the response channel, if any.
    pub fn close(&mut self) {
        if let Some(mut publication) = self.publication.take() {
            publication.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::BackoffIdleStrategy;
    use crate::protocol::{Header, SCHEMA_VERSION};
    use crate::shutdown::ClosedFlag;
    use crate::transport::{LoopbackTransport, Subscription};

    fn dispatcher(
        transport: &LoopbackTransport,
    ) -> ServerDispatcher<LoopbackTransport, BackoffIdleStrategy> {
        let backpressure = Backpressure::new(BackoffIdleStrategy::new(), ClosedFlag::new());
        ServerDispatcher::new(transport.clone(), backpressure)
    }

    fn frame(message: Message) -> Vec<u8> {
        FrameEncoder::new().encode(&message).unwrap().to_vec()
    }

    fn responses(sub: &mut impl Subscription) -> Vec<Message> {
        let mut out = Vec::new();
        sub.poll(
            &mut |f| {
                if let Ok(Decoded::Message(m)) = decode_frame(f) {
                    out.push(m);
                }
            },
            16,
        );
        out
    }

    #[tokio::test]
    async fn test_connect_creates_response_publication() {
        let transport = LoopbackTransport::new();
        let client_inbound = Channel::new("inbound://c1", 7);
        let _sub = transport.add_subscription(&client_inbound).unwrap();
        let mut dispatcher = dispatcher(&transport);

        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();

        assert!(dispatcher.is_rendezvous_complete());
        assert_eq!(dispatcher.response_channel(), Some(&client_inbound));
        assert_eq!(transport.publication_count(&client_inbound), 1);
    }

    #[tokio::test]
    async fn test_request_answered_with_matching_id() {
        let transport = LoopbackTransport::new();
        let mut sub = transport
            .add_subscription(&Channel::new("inbound://c1", 7))
            .unwrap();
        let mut dispatcher = dispatcher(&transport).with_responder(|_| "pong-ish".to_string());

        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();
        dispatcher
            .on_fragment(&frame(Message::from(RequestMessage::new(0, "ping"))))
            .await
            .unwrap();

        assert_eq!(
            responses(&mut sub),
            vec![Message::from(ResponseMessage::new(0, "pong-ish"))]
        );
        assert_eq!(dispatcher.requests_served(), 1);
    }

    #[tokio::test]
    async fn test_default_response_payload() {
        let transport = LoopbackTransport::new();
        let mut sub = transport
            .add_subscription(&Channel::new("inbound://c1", 7))
            .unwrap();
        let mut dispatcher = dispatcher(&transport);

        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();
        dispatcher
            .on_fragment(&frame(Message::from(RequestMessage::new(12, "client time: 1"))))
            .await
            .unwrap();

        match responses(&mut sub).pop() {
            Some(Message::Response(r)) => {
                assert_eq!(r.id, 12);
                assert!(r.res.starts_with("server time "));
            }
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_before_rendezvous_is_dropped() {
        let transport = LoopbackTransport::new();
        let mut dispatcher = dispatcher(&transport);

        dispatcher
            .on_fragment(&frame(Message::from(RequestMessage::new(0, "ping"))))
            .await
            .unwrap();

        assert!(!dispatcher.is_rendezvous_complete());
        assert_eq!(dispatcher.requests_served(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames_leave_state_unchanged() {
        let transport = LoopbackTransport::new();
        let _sub = transport
            .add_subscription(&Channel::new("inbound://c1", 7))
            .unwrap();
        let mut dispatcher = dispatcher(&transport);
        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();

        let mut unknown = Header::new(99, 3, SCHEMA_VERSION).encode().to_vec();
        unknown.extend_from_slice(b"???");
        dispatcher.on_fragment(&unknown).await.unwrap();
        dispatcher.on_fragment(&[1, 2, 3]).await.unwrap();
        dispatcher
            .on_fragment(&frame(Message::from(ResponseMessage::new(5, "echo"))))
            .await
            .unwrap();

        assert_eq!(
            dispatcher.response_channel(),
            Some(&Channel::new("inbound://c1", 7))
        );
        assert_eq!(dispatcher.requests_served(), 0);
    }

    #[tokio::test]
    async fn test_second_connect_replaces_response_channel() {
        let transport = LoopbackTransport::new();
        let first = Channel::new("inbound://c1", 7);
        let second = Channel::new("inbound://c2", 7);
        let _s1 = transport.add_subscription(&first).unwrap();
        let _s2 = transport.add_subscription(&second).unwrap();
        let mut dispatcher = dispatcher(&transport);

        for channel in [&first, &second] {
            dispatcher
                .on_fragment(&frame(Message::from(ConnectMessage::new(
                    channel.address.clone(),
                    channel.stream_id,
                ))))
                .await
                .unwrap();
        }

        assert_eq!(dispatcher.response_channel(), Some(&second));
        assert_eq!(transport.publication_count(&first), 0);
        assert_eq!(transport.publication_count(&second), 1);
    }

    #[tokio::test]
    async fn test_closed_response_channel_resets_rendezvous() {
        let transport = LoopbackTransport::new();
        let channel = Channel::new("inbound://c1", 7);
        let _sub = transport.add_subscription(&channel).unwrap();
        let mut dispatcher = dispatcher(&transport);
        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();

        if let Some(publication) = dispatcher.publication.as_mut() {
            publication.close();
        }
        dispatcher
            .on_fragment(&frame(Message::from(RequestMessage::new(0, "ping"))))
            .await
            .unwrap();

        assert!(!dispatcher.is_rendezvous_complete());
        assert_eq!(dispatcher.requests_served(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_publication() {
        let transport = LoopbackTransport::new();
        let channel = Channel::new("inbound://c1", 7);
        let _sub = transport.add_subscription(&channel).unwrap();
        let mut dispatcher = dispatcher(&transport);
        dispatcher
            .on_fragment(&frame(Message::from(ConnectMessage::new("inbound://c1", 7))))
            .await
            .unwrap();

        dispatcher.close();
        dispatcher.close();

        assert_eq!(transport.publication_count(&channel), 0);
        assert!(dispatcher.response_channel().is_none());
    }
}
