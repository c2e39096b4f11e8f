//! # rendezvous-rpc
//!
//! Request/response messaging over a publish/subscribe datagram transport.
//!
//! A client can only publish to the server's well-known address, so the
//! session starts with a rendezvous: the client's first frame tells the
//! server which channel to publish responses on. After that the client
//! sends one request at a time and correlates each response by id.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): 8-byte header plus Connect, Request and
//!   Response payloads, dispatched by type tag
//! - **Transport** ([`transport`]): the channel facade the core consumes,
//!   plus an in-process loopback implementation
//! - **Agents** ([`client`], [`server`]): cooperative state machines driven
//!   by an [`AgentRunner`] on their own tokio task
//! - **Backpressure** ([`backpressure`], [`idle`]): retry-with-backoff for
//!   every send and connectivity wait
//!
//! ## Example
//!
//! ```no_run
//! use rendezvous_rpc::agent::AgentRunner;
//! use rendezvous_rpc::client::ClientAgent;
//! use rendezvous_rpc::config::DeploymentConfig;
//! use rendezvous_rpc::idle::BackoffIdleStrategy;
//! use rendezvous_rpc::server::ServerAgent;
//! use rendezvous_rpc::shutdown::ClosedFlag;
//! use rendezvous_rpc::transport::LoopbackTransport;
//!
//! #[tokio::main]
//! async fn main() -> rendezvous_rpc::Result<()> {
//!     let config = DeploymentConfig::default();
//!     let transport = LoopbackTransport::new();
//!
//!     let server_closed = ClosedFlag::new();
//!     let server = ServerAgent::new(transport.clone(), &config.server, server_closed.clone())?;
//!     let server = AgentRunner::new(server, BackoffIdleStrategy::new(), server_closed).start();
//!
//!     let client_closed = ClosedFlag::new();
//!     let client = ClientAgent::new(&transport, &config.client, client_closed.clone())?;
//!     let client = AgentRunner::new(client, BackoffIdleStrategy::new(), client_closed).start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.close().await;
//!     server.close().await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod backpressure;
pub mod client;
pub mod config;
pub mod error;
pub mod idle;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use agent::{Agent, AgentHandle, AgentRunner, ErrorHandler, LoggingErrorHandler};
pub use client::{ClientAgent, SessionState};
pub use error::{RendezvousError, Result};
pub use server::{ServerAgent, ServerDispatcher};
pub use shutdown::{ClosedFlag, ShutdownCoordinator};

/// Wall-clock milliseconds since the Unix epoch, for default payloads.
pub(crate) fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}
