use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Remote config service endpoints and transport parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Service endpoints, e.g. `http://polaris1:8090`
    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,

    /// Weight assigned to every resolved endpoint
    #[serde(default = "default_node_weight")]
    pub node_weight: u32,

    /// Static value for the `X-Polaris-Token` header
    #[serde(default)]
    pub access_token: Option<String>,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Timeout for fetch/list requests in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Server-side idle period of a long-poll in milliseconds.
    /// The HTTP deadline of a long-poll request is this plus `request_timeout_in_ms`.
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_in_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addresses: default_addresses(),
            node_weight: default_node_weight(),
            access_token: None,
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            long_poll_timeout_in_ms: default_long_poll_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "server.addresses must contain at least one endpoint".into(),
            )));
        }

        if self.addresses.iter().any(|a| a.trim().is_empty()) {
            return Err(Error::Config(ConfigError::Message(
                "server.addresses must not contain empty entries".into(),
            )));
        }

        if self.node_weight == 0 {
            return Err(Error::Config(ConfigError::Message(
                "server.node_weight must be greater than 0".into(),
            )));
        }

        if self.connect_timeout_in_ms == 0 || self.request_timeout_in_ms == 0 || self.long_poll_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "server timeouts must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    /// Deadline for one long-poll round trip
    pub fn long_poll_deadline(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_in_ms + self.request_timeout_in_ms)
    }
}

fn default_addresses() -> Vec<String> {
    vec!["http://127.0.0.1:8090".to_string()]
}
fn default_node_weight() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    1000
}
fn default_request_timeout() -> u64 {
    3000
}
// Polaris answers an idle WatchConfigFile after one minute
fn default_long_poll_timeout() -> u64 {
    60_000
}
