//! Configuration watch engine
//!
//! Each [`ConfigFilesWatcher`] runs one long-poll loop over a set of files,
//! classifies every reported transition into a [`ConfigFileChangeEvent`],
//! hands it to the registered sinks and advances its [`Revision`].
//!
//! [`WatchCoordinator`] maps key-value style keys onto files, resolves
//! wildcard keys against the group listing and lets callers block until
//! anything in a key set changed.

mod coordinator;
mod event;
mod file_watcher;
mod key;
mod revision;
mod sink;

pub use coordinator::*;
pub use event::*;
pub use file_watcher::*;
pub use key::*;
pub use revision::*;
pub use sink::ChangeCallback;


use std::sync::Arc;

use crate::ConfWatchConfig;
use crate::ConfigService;
use crate::ContentDecryptor;

/// Collaborators shared by every watcher created from one client
#[derive(Clone)]
pub(crate) struct WatchContext {
    pub(crate) service: Arc<dyn ConfigService>,
    pub(crate) config: Arc<ConfWatchConfig>,
    pub(crate) decryptor: Option<Arc<dyn ContentDecryptor>>,
}

impl WatchContext {
    pub(crate) fn decryptor(&self) -> Option<&dyn ContentDecryptor> {
        self.decryptor.as_deref()
    }
}
