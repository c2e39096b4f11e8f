//! In-process transport.
//!
//! Channels live in a shared registry keyed by [`Channel`]. Each channel is
//! a bounded FIFO of frames plus counts of the open handles on both sides,
//! which is all that connectivity and backpressure need.
//!
//! # Example
//!
//! ```
//! use rendezvous_rpc::transport::{
//!     Channel, LoopbackTransport, OfferOutcome, Publication, Subscription, Transport,
//! };
//!
//! let transport = LoopbackTransport::new();
//! let channel = Channel::new("inbound://c1", 7);
//! let mut publication = transport.add_publication(&channel).unwrap();
//! let mut subscription = transport.add_subscription(&channel).unwrap();
//!
//! assert!(publication.is_connected());
//! assert_eq!(publication.offer(b"frame"), OfferOutcome::Success);
//!
//! let mut seen = Vec::new();
//! assert_eq!(subscription.poll(&mut |f| seen.push(f.to_vec()), 10), 1);
//! assert_eq!(seen, vec![b"frame".to_vec()]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::{Channel, OfferOutcome, Publication, Subscription, Transport};
use crate::error::Result;

/// Default per-channel capacity, in frames.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct ChannelState {
    frames: VecDeque<Bytes>,
    publications: usize,
    subscriptions: usize,
}

#[derive(Debug)]
struct Registry {
    channels: HashMap<Channel, ChannelState>,
    capacity: usize,
}

/// In-process transport. Cloning shares the same registry.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    registry: Arc<Mutex<Registry>>,
}

impl LoopbackTransport {
    /// Create a transport with the default per-channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a transport whose channels hold at most `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                channels: HashMap::new(),
                capacity,
            })),
        }
    }

    /// Number of frames waiting on a channel.
    pub fn queued_frames(&self, channel: &Channel) -> usize {
        lock(&self.registry)
            .channels
            .get(channel)
            .map_or(0, |state| state.frames.len())
    }

    /// Number of open publications on a channel.
    pub fn publication_count(&self, channel: &Channel) -> usize {
        lock(&self.registry)
            .channels
            .get(channel)
            .map_or(0, |state| state.publications)
    }

    /// Number of open subscriptions on a channel.
    pub fn subscription_count(&self, channel: &Channel) -> usize {
        lock(&self.registry)
            .channels
            .get(channel)
            .map_or(0, |state| state.subscriptions)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    type Publication = LoopbackPublication;
    type Subscription = LoopbackSubscription;

    fn add_publication(&self, channel: &Channel) -> Result<LoopbackPublication> {
        lock(&self.registry)
            .channels
            .entry(channel.clone())
            .or_default()
            .publications += 1;
        tracing::debug!("publication added: {}", channel);
        Ok(LoopbackPublication {
            registry: self.registry.clone(),
            channel: channel.clone(),
            closed: false,
        })
    }

    fn add_subscription(&self, channel: &Channel) -> Result<LoopbackSubscription> {
        lock(&self.registry)
            .channels
            .entry(channel.clone())
            .or_default()
            .subscriptions += 1;
        tracing::debug!("subscription added: {}", channel);
        Ok(LoopbackSubscription {
            registry: self.registry.clone(),
            channel: channel.clone(),
            closed: false,
        })
    }
}

/// Send side of a loopback channel. Closes on drop.
#[derive(Debug)]
pub struct LoopbackPublication {
    registry: Arc<Mutex<Registry>>,
    channel: Channel,
    closed: bool,
}

impl Publication for LoopbackPublication {
    fn channel(&self) -> &Channel {
        &self.channel
    }

    fn is_connected(&self) -> bool {
        !self.closed
            && lock(&self.registry)
                .channels
                .get(&self.channel)
                .is_some_and(|state| state.subscriptions > 0)
    }

    fn offer(&mut self, frame: &[u8]) -> OfferOutcome {
        if self.closed {
            return OfferOutcome::Closed;
        }
        let mut registry = lock(&self.registry);
        let capacity = registry.capacity;
        let Some(state) = registry.channels.get_mut(&self.channel) else {
            return OfferOutcome::Closed;
        };
        if state.subscriptions == 0 || state.frames.len() >= capacity {
            return OfferOutcome::Backpressured;
        }
        state.frames.push_back(Bytes::copy_from_slice(frame));
        OfferOutcome::Success
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        release(&self.registry, &self.channel, |state| {
            state.publications = state.publications.saturating_sub(1);
        });
        tracing::debug!("publication closed: {}", self.channel);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LoopbackPublication {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receive side of a loopback channel. Closes on drop.
#[derive(Debug)]
pub struct LoopbackSubscription {
    registry: Arc<Mutex<Registry>>,
    channel: Channel,
    closed: bool,
}

impl Subscription for LoopbackSubscription {
    fn channel(&self) -> &Channel {
        &self.channel
    }

    fn is_connected(&self) -> bool {
        !self.closed
            && lock(&self.registry)
                .channels
                .get(&self.channel)
                .is_some_and(|state| state.publications > 0)
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), fragment_limit: usize) -> usize {
        if self.closed {
            return 0;
        }
        // Drain under the lock, deliver outside it so handlers may touch the transport
        let batch: Vec<Bytes> = {
            let mut registry = lock(&self.registry);
            let Some(state) = registry.channels.get_mut(&self.channel) else {
                return 0;
            };
            let n = fragment_limit.min(state.frames.len());
            state.frames.drain(..n).collect()
        };
        for frame in &batch {
            handler(frame);
        }
        batch.len()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        release(&self.registry, &self.channel, |state| {
            state.subscriptions = state.subscriptions.saturating_sub(1);
            // frames queued for a departed reader must not reach the next one
            if state.subscriptions == 0 {
                state.frames.clear();
            }
        });
        tracing::debug!("subscription closed: {}", self.channel);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LoopbackSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop one handle's count from a channel and forget the channel once no
/// handle on either side remains.
fn release(
    registry: &Mutex<Registry>,
    channel: &Channel,
    update: impl FnOnce(&mut ChannelState),
) {
    let mut registry = lock(registry);
    let Some(state) = registry.channels.get_mut(channel) else {
        return;
    };
    update(state);
    if state.publications == 0 && state.subscriptions == 0 {
        registry.channels.remove(channel);
    }
}
