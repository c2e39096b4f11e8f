//! Client and server configuration.
//!
//! Defaults reproduce the reference deployment: the server listens on
//! `udp://127.0.0.1:2000`, the client receives responses on
//! `udp://127.0.0.1:2001`, both on stream 1, with one request every five
//! seconds. Timeouts are off unless configured.
//!
//! Configuration can be loaded from JSON; missing fields take defaults and
//! durations are written in milliseconds:
//!
//! ```
//! use std::time::Duration;
//! use rendezvous_rpc::config::ClientConfig;
//!
//! let config = ClientConfig::from_json_str(r#"{ "think_time_ms": 250 }"#).unwrap();
//! assert_eq!(config.think_time, Duration::from_millis(250));
//! assert_eq!(config.outbound.address, "udp://127.0.0.1:2000");
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::idle::IdleConfig;
use crate::transport::Channel;

/// Stream id used by both directions in the reference deployment.
pub const RPC_STREAM: i32 = 1;

/// Address the server subscribes to and the client publishes requests on.
pub const SERVER_INBOUND_ADDRESS: &str = "udp://127.0.0.1:2000";

/// Address the client subscribes to and asks the server to publish on.
pub const CLIENT_INBOUND_ADDRESS: &str = "udp://127.0.0.1:2001";

/// Default delay before each request.
pub const DEFAULT_THINK_TIME: Duration = Duration::from_secs(5);

/// Default fragments handled per poll.
pub const DEFAULT_FRAGMENT_LIMIT: usize = 1;

/// Client session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server's well-known inbound channel (the client publishes here).
    pub outbound: Channel,
    /// Client's own inbound channel, announced in the Connect message.
    pub inbound: Channel,
    /// Delay before each request.
    #[serde(rename = "think_time_ms", with = "millis")]
    pub think_time: Duration,
    /// Fragments handled per poll while awaiting a response.
    pub fragment_limit: usize,
    #[serde(rename = "connect_timeout_ms", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "send_timeout_ms", with = "opt_millis")]
    pub send_timeout: Option<Duration>,
    #[serde(rename = "response_timeout_ms", with = "opt_millis")]
    pub response_timeout: Option<Duration>,
    pub idle: IdleConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound: Channel::new(SERVER_INBOUND_ADDRESS, RPC_STREAM),
            inbound: Channel::new(CLIENT_INBOUND_ADDRESS, RPC_STREAM),
            think_time: DEFAULT_THINK_TIME,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            connect_timeout: None,
            send_timeout: None,
            response_timeout: None,
            idle: IdleConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the server's rendezvous channel.
    pub fn with_outbound(mut self, channel: Channel) -> Self {
        self.outbound = channel;
        self
    }

    /// Set the channel responses arrive on.
    pub fn with_inbound(mut self, channel: Channel) -> Self {
        self.inbound = channel;
        self
    }

    /// Set the delay before each request.
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    /// Bound each connectivity wait. `None` waits until closed.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound each backpressured send. `None` waits until closed.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Bound each wait for a response. `None` waits until closed.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Server dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Well-known rendezvous channel.
    pub inbound: Channel,
    /// Fragments handled per `do_work`.
    pub fragment_limit: usize,
    #[serde(rename = "connect_timeout_ms", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    #[serde(rename = "send_timeout_ms", with = "opt_millis")]
    pub send_timeout: Option<Duration>,
    pub idle: IdleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            inbound: Channel::new(SERVER_INBOUND_ADDRESS, RPC_STREAM),
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            connect_timeout: None,
            send_timeout: None,
            idle: IdleConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the rendezvous channel to subscribe to.
    pub fn with_inbound(mut self, channel: Channel) -> Self {
        self.inbound = channel;
        self
    }

    /// Set the fragments handled per `do_work`. Zero is treated as one.
    pub fn with_fragment_limit(mut self, limit: usize) -> Self {
        self.fragment_limit = limit;
        self
    }

    /// Bound each connectivity wait. `None` waits until closed.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Both sides of a deployment in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl DeploymentConfig {
    /// Read a file with optional `client` and `server` sections.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
