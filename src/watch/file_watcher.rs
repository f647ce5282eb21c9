use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::classify;
use super::sink::ChangeSinks;
use super::ChangeCallback;
use super::ConfigFileChangeEvent;
use super::FileContent;
use super::Revision;
use super::WatchContext;
use crate::utils::backoff::Backoff;
use crate::ConfigFileId;
use crate::Result;
use crate::WatchError;
use crate::WatchResponse;
use crate::WatchedVersion;

/// Last observed state of one watched file
#[derive(Debug, Clone)]
struct WatchedFile {
    id: ConfigFileId,
    version: u64,
    content: FileContent,
}

/// State shared between the handle and its loop.
///
/// `files` is only written by the loop task.
struct WatcherShared {
    namespace: String,
    group: String,
    files: RwLock<BTreeMap<String, WatchedFile>>,
    sinks: ChangeSinks,
    revision: Revision,
    listener_buffer_size: usize,
}

impl WatcherShared {
    fn watched_versions(&self) -> Vec<WatchedVersion> {
        self.files
            .read()
            .values()
            .map(|f| WatchedVersion {
                id: f.id.clone(),
                version: f.version,
            })
            .collect()
    }
}

/// Long-poll watch over a set of files of one group.
///
/// The loop runs until [`stop`](ConfigFilesWatcher::stop) is called, the
/// handle is dropped, the parent token is cancelled, or the service answers
/// with a status it does not recognise.
pub struct ConfigFilesWatcher {
    shared: Arc<WatcherShared>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ConfigFilesWatcher {
    /// Fetch the initial state of every file and spawn the watch loop.
    ///
    /// `listeners` are registered before the loop starts, so they see every
    /// transition after the initial fetch. A file that does not exist yet
    /// starts absent at version 0. Any fetch failure aborts the setup.
    pub(crate) async fn start(
        ctx: &WatchContext,
        namespace: &str,
        group: &str,
        file_names: &[String],
        listeners: Vec<ChangeCallback>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        if file_names.is_empty() {
            return Err(WatchError::EmptyFileList.into());
        }
        if file_names.iter().any(|name| name.is_empty()) {
            return Err(WatchError::EmptyFileName.into());
        }

        let mut files = BTreeMap::new();
        for name in file_names {
            let id = ConfigFileId::new(namespace, group, name.as_str());
            let initial = ctx.service.fetch_file(&id).await.map_err(|e| WatchError::Setup {
                file: id.to_string(),
                source: Box::new(e),
            })?;

            let (content, version) = match initial {
                Some(file) => (FileContent::Present(file.decoded_content(ctx.decryptor())), file.version),
                None => {
                    debug!(file = %id, "file not released yet, watching for creation");
                    (FileContent::NotExisted, 0)
                }
            };
            files.insert(name.clone(), WatchedFile { id, version, content });
        }

        let shared = Arc::new(WatcherShared {
            namespace: namespace.to_string(),
            group: group.to_string(),
            files: RwLock::new(files),
            sinks: ChangeSinks::default(),
            revision: Revision::new(),
            listener_buffer_size: ctx.config.watch.listener_buffer_size,
        });
        for listener in listeners {
            shared.sinks.add_callback(listener);
        }

        let cancel = parent.child_token();
        let done = CancellationToken::new();
        let watch_loop = WatchLoop {
            ctx: ctx.clone(),
            shared: shared.clone(),
            cancel: cancel.clone(),
        };
        let guard = done.clone().drop_guard();
        tokio::spawn(async move {
            let _guard = guard;
            watch_loop.run().await;
        });

        Ok(Self { shared, cancel, done })
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn group(&self) -> &str {
        &self.shared.group
    }

    /// Identities of the watched files
    pub fn files(&self) -> Vec<ConfigFileId> {
        self.shared.files.read().values().map(|f| f.id.clone()).collect()
    }

    /// Last observed content, `None` if the file is absent or not watched
    pub fn content(
        &self,
        file_name: &str,
    ) -> Option<String> {
        match &self.shared.files.read().get(file_name)?.content {
            FileContent::Present(content) => Some(content.clone()),
            FileContent::NotExisted => None,
        }
    }

    /// Last observed remote version of a watched file
    pub fn version(
        &self,
        file_name: &str,
    ) -> Option<u64> {
        self.shared.files.read().get(file_name).map(|f| f.version)
    }

    /// Invoke `listener` on the watcher task for every event.
    ///
    /// The listener must not block; slow work belongs behind a channel.
    pub fn add_change_listener<F>(
        &self,
        listener: F,
    ) where
        F: Fn(&ConfigFileChangeEvent) + Send + Sync + 'static,
    {
        self.shared.sinks.add_callback(Arc::new(listener));
    }

    /// Bounded queue of events.
    ///
    /// Capacity is `watch.listener_buffer_size`. While the queue is full the
    /// watcher waits, so a stalled consumer delays later events of these
    /// files. Dropping the receiver unsubscribes.
    pub fn add_change_channel(&self) -> mpsc::Receiver<ConfigFileChangeEvent> {
        self.shared.sinks.add_queue(self.shared.listener_buffer_size)
    }

    /// [`add_change_channel`](Self::add_change_channel) as a `Stream`
    pub fn event_stream(&self) -> ReceiverStream<ConfigFileChangeEvent> {
        ReceiverStream::new(self.add_change_channel())
    }

    /// Advances once per published event
    pub fn revision(&self) -> Revision {
        self.shared.revision.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the loop task exited
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait for the loop task to exit
    pub async fn finished(&self) {
        self.done.cancelled().await
    }
}

impl Drop for ConfigFilesWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Step {
    /// Round completed, poll again right away
    Continue,
    /// Transient failure, poll again after backoff
    Retry,
    Stop,
}

struct WatchLoop {
    ctx: WatchContext,
    shared: Arc<WatcherShared>,
    cancel: CancellationToken,
}

impl WatchLoop {
    async fn run(self) {
        let mut backoff = Backoff::new(self.ctx.config.retry);
        info!(
            namespace = %self.shared.namespace,
            group = %self.shared.group,
            files = self.shared.files.read().len(),
            "config file watcher started"
        );

        loop {
            let watched = self.shared.watched_versions();
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                response = self.ctx.service.long_poll_watch(&watched) => response,
            };

            let step = match response {
                Ok(WatchResponse::NoChange) => {
                    trace!(group = %self.shared.group, "long-poll idle, polling again");
                    Step::Continue
                }
                Ok(WatchResponse::Changed { id, version }) => self.on_changed(id, version).await,
                Ok(WatchResponse::Unrecognized { code, info }) => {
                    let e = WatchError::Protocol { code, info };
                    error!(
                        namespace = %self.shared.namespace,
                        group = %self.shared.group,
                        "stopping config file watcher: {}", e
                    );
                    Step::Stop
                }
                Err(e) => {
                    warn!(group = %self.shared.group, failures = backoff.failures(), "long-poll failed: {}", e);
                    Step::Retry
                }
            };

            match step {
                Step::Continue => backoff.reset(),
                Step::Retry => {
                    if !backoff.wait(&self.cancel).await {
                        break;
                    }
                }
                Step::Stop => break,
            }
        }

        info!(
            namespace = %self.shared.namespace,
            group = %self.shared.group,
            "config file watcher stopped"
        );
    }

    async fn on_changed(
        &self,
        id: ConfigFileId,
        notified_version: u64,
    ) -> Step {
        let held_version = if id.namespace == self.shared.namespace && id.group == self.shared.group {
            self.shared.files.read().get(&id.file_name).map(|f| f.version)
        } else {
            None
        };
        let Some(held_version) = held_version else {
            warn!(file = %id, "change reported for a file this watcher does not watch");
            return Step::Retry;
        };
        if held_version == notified_version {
            warn!(file = %id, version = notified_version, "change reported for the version already held");
            return Step::Retry;
        }

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Step::Stop,
            fetched = self.ctx.service.fetch_file(&id) => fetched,
        };

        // A failed fetch keeps the old version, so the next poll reports the change again.
        // A lagging read never drags the stored version below the notified one.
        let (content, version) = match fetched {
            Ok(Some(file)) => (
                FileContent::Present(file.decoded_content(self.ctx.decryptor())),
                file.version.max(notified_version),
            ),
            Ok(None) => (FileContent::NotExisted, notified_version),
            Err(e) => {
                warn!(file = %id, version = notified_version, "failed to fetch changed file: {}", e);
                return Step::Retry;
            }
        };

        let old = {
            let mut files = self.shared.files.write();
            let Some(entry) = files.get_mut(&id.file_name) else {
                return Step::Retry;
            };
            entry.version = version;
            std::mem::replace(&mut entry.content, content.clone())
        };

        let (change_type, old_value, new_value) = classify(&old, &content);
        debug!(file = %id, version, change = %change_type, "config file changed");

        let event = ConfigFileChangeEvent {
            file: id,
            version,
            change_type,
            old_value,
            new_value,
        };
        if !self.shared.sinks.publish(&event, &self.cancel).await {
            return Step::Stop;
        }
        self.shared.revision.bump();

        Step::Continue
    }
}
