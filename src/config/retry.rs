use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Backoff applied by watch loops after consecutive transient failures
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay after the first failure (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for the doubled delay (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "retry.base_delay_ms must be greater than 0".into(),
            )));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.max_delay_ms ({}) must not be less than retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }

        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    10_000
}
