//! Server side: a polling agent in front of a [`ServerDispatcher`].
//!
//! The agent owns the subscription on the well-known rendezvous channel.
//! Each `do_work` drains up to `fragment_limit` fragments and feeds them to
//! the dispatcher in delivery order. If a dispatch fails, the fragments after
//! it stay in the inbox and are dispatched by the next `do_work` before the
//! subscription is polled again.

mod dispatcher;

use std::collections::VecDeque;

use bytes::Bytes;

pub use dispatcher::ServerDispatcher;

use crate::agent::Agent;
use crate::backpressure::Backpressure;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::idle::{BackoffIdleStrategy, IdleStrategy};
use crate::protocol::RequestMessage;
use crate::shutdown::ClosedFlag;
use crate::transport::{Subscription, Transport};

/// Server agent: subscription plus dispatcher.
pub struct ServerAgent<T: Transport, I = BackoffIdleStrategy> {
    subscription: T::Subscription,
    dispatcher: ServerDispatcher<T, I>,
    fragment_limit: usize,
    /// Polled but not yet dispatched, in delivery order.
    inbox: VecDeque<Bytes>,
}

impl<T: Transport> ServerAgent<T, BackoffIdleStrategy> {
    /// Subscribe to `config.inbound` with the backoff tunables from `config`.
    pub fn new(transport: T, config: &ServerConfig, closed: ClosedFlag) -> Result<Self> {
        Self::with_idle_strategy(
            transport,
            config,
            BackoffIdleStrategy::with_config(config.idle),
            closed,
        )
    }
}

impl<T: Transport, I: IdleStrategy> ServerAgent<T, I> {
    /// Subscribe to `config.inbound` with an explicit idle strategy for the dispatcher's waits.
    pub fn with_idle_strategy(
        transport: T,
        config: &ServerConfig,
        idle: I,
        closed: ClosedFlag,
    ) -> Result<Self> {
        let subscription = transport.add_subscription(&config.inbound)?;
        let backpressure = Backpressure::new(idle, closed)
            .with_send_timeout(config.send_timeout)
            .with_connect_timeout(config.connect_timeout);
        let fragment_limit = config.fragment_limit.max(1);

        Ok(Self {
            subscription,
            dispatcher: ServerDispatcher::new(transport, backpressure),
            fragment_limit,
            inbox: VecDeque::with_capacity(fragment_limit),
        })
    }

    /// Replace the response payload source.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&RequestMessage) -> String + Send + 'static,
    {
        self.dispatcher = self.dispatcher.with_responder(responder);
        self
    }

    /// The dispatcher, for rendezvous and request counters.
    pub fn dispatcher(&self) -> &ServerDispatcher<T, I> {
        &self.dispatcher
    }

    /// Release the response channel and the inbound subscription.
    pub fn close(&mut self) {
        self.dispatcher.close();
        self.subscription.close();
    }
}

impl<T: Transport, I: IdleStrategy + 'static> Agent for ServerAgent<T, I> {
    fn role_name(&self) -> &str {
        "rpc-server"
    }

    fn on_start(&mut self) -> Result<()> {
        tracing::info!("rpc server started, inbound: {}", self.subscription.channel());
        Ok(())
    }

    async fn do_work(&mut self) -> Result<usize> {
        if self.inbox.is_empty() {
            let inbox = &mut self.inbox;
            self.subscription.poll(
                &mut |fragment| inbox.push_back(Bytes::copy_from_slice(fragment)),
                self.fragment_limit,
            );
        }

        let mut dispatched = 0;
        while let Some(fragment) = self.inbox.pop_front() {
            dispatched += 1;
            self.dispatcher.on_fragment(&fragment).await?;
        }
        Ok(dispatched)
    }

    fn on_close(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::RendezvousError;
    use crate::protocol::{ConnectMessage, FrameEncoder, Message};
    use crate::transport::{Channel, LoopbackTransport, OfferOutcome, Publication};

    #[tokio::test]
    async fn test_poll_without_data_is_zero_work() {
        let transport = LoopbackTransport::new();
        let mut server =
            ServerAgent::new(transport.clone(), &ServerConfig::default(), ClosedFlag::new())
                .unwrap();

        assert_eq!(server.do_work().await.unwrap(), 0);
        assert!(!server.dispatcher().is_rendezvous_complete());
    }

    #[tokio::test]
    async fn test_fragment_limit_bounds_each_poll() {
        let transport = LoopbackTransport::new();
        let config = ServerConfig::default().with_fragment_limit(2);
        let mut server = ServerAgent::new(transport.clone(), &config, ClosedFlag::new())
            .unwrap()
            .with_responder(|r| format!("re: {}", r.req));
        let mut client_pub = transport.add_publication(&config.inbound).unwrap();
        let _client_sub = transport
            .add_subscription(&Channel::new("inbound://c1", 7))
            .unwrap();

        let mut encoder = FrameEncoder::new();
        let connect = encoder
            .encode(&Message::from(ConnectMessage::new("inbound://c1", 7)))
            .unwrap()
            .to_vec();
        for _ in 0..3 {
            assert_eq!(client_pub.offer(&connect), OfferOutcome::Success);
        }

        assert_eq!(server.do_work().await.unwrap(), 2);
        assert_eq!(server.do_work().await.unwrap(), 1);
        assert_eq!(server.do_work().await.unwrap(), 0);
        assert!(server.dispatcher().is_rendezvous_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dispatch_keeps_rest_of_batch() {
        let transport = LoopbackTransport::new();
        let config = ServerConfig::default()
            .with_fragment_limit(2)
            .with_connect_timeout(Some(Duration::from_millis(10)));
        let mut server = ServerAgent::new(transport.clone(), &config, ClosedFlag::new()).unwrap();
        let mut client_pub = transport.add_publication(&config.inbound).unwrap();
        let good = Channel::new("inbound://good", 7);
        let _good_sub = transport.add_subscription(&good).unwrap();

        let mut encoder = FrameEncoder::new();
        for connect in [
            ConnectMessage::new("inbound://nobody", 1),
            ConnectMessage::new("inbound://good", 7),
        ] {
            let frame = encoder.encode(&Message::from(connect)).unwrap().to_vec();
            assert_eq!(client_pub.offer(&frame), OfferOutcome::Success);
        }

        // nobody subscribes to the first response channel
        let result = server.do_work().await;
        assert!(matches!(
            result,
            Err(RendezvousError::Timeout {
                what: "outbound connect",
                ..
            })
        ));
        assert_eq!(transport.queued_frames(&config.inbound), 0);
        assert!(!server.dispatcher().is_rendezvous_complete());

        assert_eq!(server.do_work().await.unwrap(), 1);
        assert_eq!(server.dispatcher().response_channel(), Some(&good));
        assert_eq!(server.do_work().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let transport = LoopbackTransport::new();
        let config = ServerConfig::default();
        let mut server = ServerAgent::new(transport.clone(), &config, ClosedFlag::new()).unwrap();
        assert_eq!(transport.subscription_count(&config.inbound), 1);

        server.on_close();
        assert_eq!(transport.subscription_count(&config.inbound), 0);
    }
}
