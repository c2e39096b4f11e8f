//! Client session.
//!
//! The [`ClientAgent`] drives one session through the rendezvous and then
//! issues requests one at a time:
//!
//! ```text
//! AwaitingOutboundConnect ─► Connected ─► AwaitingInboundConnect ─► Ready ⇄ AwaitingResult
//!          (any state) ─────────────────────────────────────────────► Closed
//! ```
//!
//! Each `do_work` call performs one transition. Waits inside a state spin
//! through the session's [`Backpressure`] loop and stop as soon as the
//! closed flag is raised.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use rendezvous_rpc::agent::AgentRunner;
//! use rendezvous_rpc::client::ClientAgent;
//! use rendezvous_rpc::config::ClientConfig;
//! use rendezvous_rpc::idle::BackoffIdleStrategy;
//! use rendezvous_rpc::shutdown::ClosedFlag;
//! use rendezvous_rpc::transport::LoopbackTransport;
//!
//! # async fn run() -> rendezvous_rpc::Result<()> {
//! let transport = LoopbackTransport::new();
//! let closed = ClosedFlag::new();
//! let config = ClientConfig::default().with_think_time(Duration::from_millis(100));
//!
//! let (tx, mut responses) = tokio::sync::mpsc::unbounded_channel();
//! let client = ClientAgent::new(&transport, &config, closed.clone())?.with_response_sink(tx);
//! let handle = AgentRunner::new(client, BackoffIdleStrategy::new(), closed).start();
//!
//! if let Some(response) = responses.recv().await {
//!     println!("{}: {}", response.id, response.res);
//! }
//! handle.close().await;
//! # Ok(())
//! # }
//! ```

mod adapter;

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

pub use adapter::ClientAdapter;

use crate::agent::Agent;
use crate::backpressure::Backpressure;
use crate::config::ClientConfig;
use crate::error::{RendezvousError, Result};
use crate::idle::{BackoffIdleStrategy, IdleStrategy};
use crate::protocol::{ConnectMessage, FrameEncoder, Message, RequestMessage, ResponseMessage};
use crate::shutdown::ClosedFlag;
use crate::transport::{Publication, Subscription, Transport};

/// Longest uninterrupted sleep during think time, so a close is noticed promptly.
const THINK_SLICE: Duration = Duration::from_millis(10);

type RequestSource = Box<dyn FnMut(u64) -> String + Send>;

/// Client session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingOutboundConnect,
    Connected,
    AwaitingInboundConnect,
    Ready,
    AwaitingResult,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingOutboundConnect => "awaiting-outbound-connect",
            SessionState::Connected => "connected",
            SessionState::AwaitingInboundConnect => "awaiting-inbound-connect",
            SessionState::Ready => "ready",
            SessionState::AwaitingResult => "awaiting-result",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One client session: owns both channel handles and the in-flight request.
pub struct ClientAgent<T: Transport, I = BackoffIdleStrategy> {
    outbound: T::Publication,
    inbound: T::Subscription,
    state: SessionState,
    encoder: FrameEncoder,
    adapter: ClientAdapter,
    backpressure: Backpressure<I>,
    think_time: Duration,
    fragment_limit: usize,
    response_timeout: Option<Duration>,
    next_request_id: u64,
    outstanding: Option<u64>,
    request_source: RequestSource,
    response_sink: Option<mpsc::UnboundedSender<ResponseMessage>>,
    responses_received: u64,
}

impl<T: Transport> ClientAgent<T, BackoffIdleStrategy> {
    /// Create a session with the backoff tunables from `config`.
    ///
    /// Both channel handles are created here; nothing is sent until the
    /// first `do_work`.
    pub fn new(transport: &T, config: &ClientConfig, closed: ClosedFlag) -> Result<Self> {
        Self::with_idle_strategy(
            transport,
            config,
            BackoffIdleStrategy::with_config(config.idle),
            closed,
        )
    }
}

impl<T: Transport, I: IdleStrategy> ClientAgent<T, I> {
    /// Create a session with an explicit idle strategy for its spin points.
    pub fn with_idle_strategy(
        transport: &T,
        config: &ClientConfig,
        idle: I,
        closed: ClosedFlag,
    ) -> Result<Self> {
        let outbound = transport.add_publication(&config.outbound)?;
        let inbound = transport.add_subscription(&config.inbound)?;
        let backpressure = Backpressure::new(idle, closed)
            .with_send_timeout(config.send_timeout)
            .with_connect_timeout(config.connect_timeout);

        Ok(Self {
            outbound,
            inbound,
            state: SessionState::AwaitingOutboundConnect,
            encoder: FrameEncoder::new(),
            adapter: ClientAdapter::new(),
            backpressure,
            think_time: config.think_time,
            fragment_limit: config.fragment_limit.max(1),
            response_timeout: config.response_timeout,
            next_request_id: 0,
            outstanding: None,
            request_source: Box::new(|_| format!("client time: {}", crate::unix_millis())),
            response_sink: None,
            responses_received: 0,
        })
    }

    /// Replace the request payload source. It receives the request id.
    pub fn with_request_source<F>(mut self, source: F) -> Self
    where
        F: FnMut(u64) -> String + Send + 'static,
    {
        self.request_source = Box::new(source);
        self
    }

    /// Forward every matched response to `sink`.
    pub fn with_response_sink(mut self, sink: mpsc::UnboundedSender<ResponseMessage>) -> Self {
        self.response_sink = Some(sink);
        self
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id the next request will carry.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id
    }

    /// Id of the request awaiting a response, if any.
    pub fn outstanding_request(&self) -> Option<u64> {
        self.outstanding
    }

    /// Responses matched to an outstanding request.
    pub fn responses_received(&self) -> u64 {
        self.responses_received
    }

    /// Inbound fragments that were logged and dropped.
    pub fn ignored_fragments(&self) -> u64 {
        self.adapter.ignored()
    }

    /// Flag shared with whoever may close this session.
    pub fn closed_flag(&self) -> &ClosedFlag {
        self.backpressure.closed_flag()
    }

    /// Close the session and release both handles. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            tracing::debug!("client session closing from state {}", self.state);
        }
        self.state = SessionState::Closed;
        self.backpressure.closed_flag().close();
        self.outbound.close();
        self.inbound.close();
    }

    async fn step(&mut self) -> Result<usize> {
        match self.state {
            SessionState::AwaitingOutboundConnect => {
                let outbound = &self.outbound;
                self.backpressure
                    .await_connected("outbound connect", || outbound.is_connected())
                    .await?;
                tracing::info!("outbound connected, channel: {}", self.outbound.channel());
                self.state = SessionState::Connected;
                Ok(1)
            }
            SessionState::Connected => {
                let channel = self.inbound.channel();
                let connect = ConnectMessage::new(channel.address.clone(), channel.stream_id);
                let frame = self.encoder.encode(&Message::from(connect))?;
                self.backpressure.send(&mut self.outbound, frame).await?;
                tracing::debug!("connect sent, response channel: {}", self.inbound.channel());
                self.state = SessionState::AwaitingInboundConnect;
                Ok(1)
            }
            SessionState::AwaitingInboundConnect => {
                let inbound = &self.inbound;
                self.backpressure
                    .await_connected("inbound connect", || inbound.is_connected())
                    .await?;
                tracing::info!("inbound connected, channel: {}", self.inbound.channel());
                self.state = SessionState::Ready;
                Ok(1)
            }
            SessionState::Ready => self.send_request().await,
            SessionState::AwaitingResult => self.await_result().await,
            SessionState::Closed => Ok(0),
        }
    }

    async fn send_request(&mut self) -> Result<usize> {
        self.think().await?;

        let id = self.next_request_id;
        let request = RequestMessage::new(id, (self.request_source)(id));
        let frame = self.encoder.encode(&Message::Request(request.clone()))?;
        self.backpressure.send(&mut self.outbound, frame).await?;
        tracing::info!("request sent, id: {}, req: {}", request.id, request.req);

        self.outstanding = Some(id);
        self.next_request_id += 1;
        self.state = SessionState::AwaitingResult;
        Ok(1)
    }

    async fn think(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.think_time;
        loop {
            if self.backpressure.is_closed() {
                return Err(RendezvousError::SessionClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(THINK_SLICE)).await;
        }
    }

    async fn await_result(&mut self) -> Result<usize> {
        let Some(expected) = self.outstanding else {
            self.state = SessionState::Ready;
            return Ok(0);
        };
        let start = Instant::now();

        loop {
            if self.backpressure.is_closed() {
                self.backpressure.idle_strategy().reset();
                return Err(RendezvousError::SessionClosed);
            }

            let mut matched: Option<ResponseMessage> = None;
            let adapter = &mut self.adapter;
            let fragments = self.inbound.poll(
                &mut |fragment| {
                    // after a match, further responses in the batch are stale
                    let expecting = if matched.is_none() { Some(expected) } else { None };
                    if let Some(response) = adapter.on_fragment(fragment, expecting) {
                        matched = Some(response);
                    }
                },
                self.fragment_limit,
            );

            if let Some(response) = matched {
                self.backpressure.idle_strategy().reset();
                self.on_response(response);
                return Ok(fragments);
            }

            if let Some(timeout) = self.response_timeout {
                if start.elapsed() >= timeout {
                    self.backpressure.idle_strategy().reset();
                    return Err(RendezvousError::Timeout {
                        what: "response",
                        after: timeout,
                    });
                }
            }

            self.backpressure.idle_strategy().idle(fragments).await;
        }
    }

    fn on_response(&mut self, response: ResponseMessage) {
        tracing::info!("response received, id: {}, res: {}", response.id, response.res);
        self.outstanding = None;
        self.responses_received += 1;
        self.state = SessionState::Ready;

        if let Some(sink) = &self.response_sink {
            if sink.send(response).is_err() {
                tracing::debug!("response sink dropped");
                self.response_sink = None;
            }
        }
    }
}

impl<T: Transport, I: IdleStrategy + 'static> Agent for ClientAgent<T, I> {
    fn role_name(&self) -> &str {
        "rpc-client"
    }

    fn on_start(&mut self) -> Result<()> {
        tracing::info!(
            "rpc client started, outbound: {}, inbound: {}",
            self.outbound.channel(),
            self.inbound.channel()
        );
        Ok(())
    }

    async fn do_work(&mut self) -> Result<usize> {
        match self.step().await {
            Err(RendezvousError::SessionClosed) => {
                self.close();
                Err(RendezvousError::SessionClosed)
            }
            other => other,
        }
    }

    fn on_close(&mut self) {
        self.close();
    }
}
