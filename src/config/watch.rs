use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Watch engine tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each channel subscriber's queue.
    ///
    /// A full queue blocks the publishing watcher until the consumer
    /// catches up, so a stalled consumer stalls that file's updates.
    ///
    /// **Default**: 64
    #[serde(default = "default_listener_buffer_size")]
    pub listener_buffer_size: usize,

    /// Interval between re-listings of a group for wildcard keys
    ///
    /// **Default**: 3000
    #[serde(default = "default_wildcard_rescan_interval")]
    pub wildcard_rescan_interval_in_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            listener_buffer_size: default_listener_buffer_size(),
            wildcard_rescan_interval_in_ms: default_wildcard_rescan_interval(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listener_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.listener_buffer_size must be greater than 0".into(),
            )));
        }

        if self.wildcard_rescan_interval_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.wildcard_rescan_interval_in_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn wildcard_rescan_interval(&self) -> Duration {
        Duration::from_millis(self.wildcard_rescan_interval_in_ms)
    }
}

fn default_listener_buffer_size() -> usize {
    64
}
fn default_wildcard_rescan_interval() -> u64 {
    3000
}
