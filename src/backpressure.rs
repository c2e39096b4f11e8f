//! Backpressure handling for outbound sends and connectivity waits.
//!
//! The transport's `offer` never blocks: it either takes the whole frame or
//! reports [`OfferOutcome::Backpressured`]. [`Backpressure`] turns that into
//! an all-or-nothing send by retrying with the idle strategy between
//! attempts. The same loop drives the connectivity waits of the handshake.
//!
//! Every spin checks the session's [`ClosedFlag`] first, so a shutdown
//! abandons the current operation within one iteration.
//!
//! # Configuration
//!
//! - `send_timeout`: give up on a backpressured send (default: never)
//! - `connect_timeout`: give up waiting for a channel to connect (default: never)

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{RendezvousError, Result};
use crate::idle::IdleStrategy;
use crate::shutdown::ClosedFlag;
use crate::transport::{OfferOutcome, Publication};

/// Retry-with-backoff loop shared by client and server.
#[derive(Debug)]
pub struct Backpressure<I> {
    idle: I,
    closed: ClosedFlag,
    send_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl<I: IdleStrategy> Backpressure<I> {
    /// Create a loop with no timeouts.
    pub fn new(idle: I, closed: ClosedFlag) -> Self {
        Self {
            idle,
            closed,
            send_timeout: None,
            connect_timeout: None,
        }
    }

    /// Give up on a send that stays backpressured for this long.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Give up on a connectivity wait after this long.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The session's closed flag.
    pub fn closed_flag(&self) -> &ClosedFlag {
        &self.closed
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// Access the idle strategy for other polling loops of the same session.
    pub fn idle_strategy(&mut self) -> &mut I {
        &mut self.idle
    }

    /// Offer `frame` until the transport accepts it.
    ///
    /// Returns the number of offers made.
    ///
    /// # Errors
    ///
    /// - `SessionClosed` if the closed flag is raised while retrying
    /// - `ChannelClosed` if the publication reports closed
    /// - `Timeout` if `send_timeout` elapses
    pub async fn send<P: Publication>(&mut self, publication: &mut P, frame: &[u8]) -> Result<usize> {
        let start = Instant::now();
        let mut attempts = 0;

        let result = loop {
            if self.closed.is_closed() {
                break Err(RendezvousError::SessionClosed);
            }

            attempts += 1;
            match publication.offer(frame) {
                OfferOutcome::Success => break Ok(attempts),
                OfferOutcome::Closed => {
                    break Err(RendezvousError::ChannelClosed(
                        publication.channel().to_string(),
                    ))
                }
                OfferOutcome::Backpressured => {}
            }

            if let Some(timeout) = self.send_timeout {
                if start.elapsed() >= timeout {
                    break Err(RendezvousError::Timeout {
                        what: "backpressured send",
                        after: timeout,
                    });
                }
            }

            self.idle.idle(0).await;
        };

        self.idle.reset();
        result
    }

    /// Spin until `is_connected` reports true.
    ///
    /// `what` names the wait in errors and logs.
    pub async fn await_connected<F>(&mut self, what: &'static str, mut is_connected: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();

        let result = loop {
            if self.closed.is_closed() {
                break Err(RendezvousError::SessionClosed);
            }
            if is_connected() {
                break Ok(());
            }
            if let Some(timeout) = self.connect_timeout {
                if start.elapsed() >= timeout {
                    break Err(RendezvousError::Timeout {
                        what,
                        after: timeout,
                    });
                }
            }
            self.idle.idle(0).await;
        };

        self.idle.reset();
        result
    }
}
