//! Client-side configuration watch engine
//!
//! Mirrors files of a remote config service and keeps local observers up to
//! date through long-polling:
//!
//! - [`ConfigFilesWatcher`]: one long-poll loop over a set of files,
//!   publishing typed [`ConfigFileChangeEvent`]s to callbacks and channels.
//! - [`WatchCoordinator`]: key-value view over files with wildcard groups and
//!   a "wait for any change in this key set" call.
//! - [`WeightedRoundRobin`]: smooth weighted round-robin over the service
//!   endpoints, used by [`HttpConfigService`].
//!
//! Start from [`ConfigClient::builder`], or [`ConfigClient::with_service`]
//! for a custom [`ConfigService`].

pub mod balancer;
mod client;
mod config;
mod errors;
mod utils;
pub mod watch;

pub use balancer::*;
pub use client::*;
pub use config::*;
pub use errors::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
