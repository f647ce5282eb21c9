//! Remote config service boundary and the client handle
//!
//! [`ConfigService`] is the only way the watch engine talks to the remote
//! side. [`HttpConfigService`] speaks the Polaris HTTP API through a
//! [`LoadBalancer`](crate::LoadBalancer); [`MemoryConfigService`] keeps
//! files in process with the same long-poll semantics.
//!
//! [`ConfigClient`] ties a service to its configuration and owns the root
//! cancellation token every watcher and coordinator derives from.

mod builder;
mod config_client;
mod http;
mod memory;
mod types;

pub use builder::*;
pub use config_client::*;
pub use http::*;
pub use memory::*;
pub use types::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Operations the watch engine needs from the remote config service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigService: Send + Sync + 'static {
    /// Fetch the released state of one file.
    ///
    /// An absent file is `Ok(None)`, not an error.
    async fn fetch_file(
        &self,
        id: &ConfigFileId,
    ) -> Result<Option<ConfigFile>>;

    /// List the files released in a group
    async fn list_files(
        &self,
        namespace: &str,
        group: &str,
    ) -> Result<Vec<ConfigFileInfo>>;

    /// Block until one of `files` moves past the version sent, or until the
    /// server-side idle period elapses.
    ///
    /// Dropping the returned future abandons the request.
    async fn long_poll_watch(
        &self,
        files: &[WatchedVersion],
    ) -> Result<WatchResponse>;
}
