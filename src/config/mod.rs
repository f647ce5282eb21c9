//! Configuration management for the watch engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`CONFWATCH__SECTION__FIELD`)
//! - Component-wise validation
mod retry;
mod server;
mod watch;
pub use retry::*;
pub use server::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "CONFWATCH";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct ConfWatchConfig {
    /// Remote config service endpoints and transport timeouts
    #[serde(default)]
    pub server: ServerConfig,
    /// Watch loop and listener delivery settings
    #[serde(default)]
    pub watch: WatchConfig,
    /// Backoff applied to repeated transient watch errors
    #[serde(default)]
    pub retry: BackoffPolicy,
}

impl Debug for ConfWatchConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConfWatchConfig")
            .field("server", &self.server)
            .field("watch", &self.watch)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ConfWatchConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `CONFWATCH__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFWATCH__SERVER__ADDRESSES", "http://10.0.0.1:8090");
    /// let cfg = ConfWatchConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.watch.validate()?;
        self.retry.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("server.addresses")
            .ignore_empty(true)
            .try_parsing(true)
    }
}
