//! Transport facade - the channel abstraction the session protocol runs on.
//!
//! The transport is an external collaborator: it owns framing at the
//! datagram level, retransmission and flow control. The core only needs
//! publications it can `offer` frames to and subscriptions it can `poll`.
//! Every operation is non-blocking.
//!
//! - [`LoopbackTransport`] - in-process implementation for tests and demos

mod loopback;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use loopback::{LoopbackPublication, LoopbackSubscription, LoopbackTransport};

/// An addressable endpoint: opaque address plus stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Address understood by the transport (e.g. `udp://127.0.0.1:2000`).
    pub address: String,
    /// Stream id, unique within the address.
    pub stream_id: i32,
}

impl Channel {
    pub fn new(address: impl Into<String>, stream_id: i32) -> Self {
        Self {
            address: address.into(),
            stream_id,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.stream_id)
    }
}

/// Outcome of a non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The whole frame was accepted.
    Success,
    /// Cannot accept right now; retry later.
    Backpressured,
    /// The publication is closed; no retry will succeed.
    Closed,
}

/// Creates channel handles.
pub trait Transport: Send + Sync + 'static {
    type Publication: Publication;
    type Subscription: Subscription;

    /// Create a publication (send side) for a channel.
    fn add_publication(&self, channel: &Channel) -> Result<Self::Publication>;

    /// Create a subscription (receive side) for a channel.
    fn add_subscription(&self, channel: &Channel) -> Result<Self::Subscription>;
}

/// Send side of a channel.
pub trait Publication: Send + Sync + 'static {
    fn channel(&self) -> &Channel;

    /// True once at least one subscriber can receive frames.
    fn is_connected(&self) -> bool;

    /// Offer a complete frame. Frames are all-or-nothing.
    fn offer(&mut self, frame: &[u8]) -> OfferOutcome;

    /// Release the handle. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Receive side of a channel.
pub trait Subscription: Send + Sync + 'static {
    fn channel(&self) -> &Channel;

    /// True once at least one publisher is attached.
    fn is_connected(&self) -> bool;

    /// Deliver up to `fragment_limit` fragments to `handler` in FIFO order.
    ///
    /// Returns the number of fragments delivered; zero is not an error.
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), fragment_limit: usize) -> usize;

    /// Release the handle. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
