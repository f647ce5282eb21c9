use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use super::ConfigFile;
use super::ConfigFileId;
use super::ConfigFileInfo;
use super::ConfigFileTag;
use super::ConfigService;
use super::WatchResponse;
use super::WatchedVersion;
use crate::Result;
use crate::ServiceError;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
struct StoredFile {
    /// `None` once deleted
    content: Option<String>,
    version: u64,
    encrypted: bool,
    tags: Vec<ConfigFileTag>,
}

/// One-shot failures queued by tests
#[derive(Debug, Default)]
struct Faults {
    fetch: usize,
    list: usize,
    poll: usize,
    unrecognized: Option<(u32, String)>,
}

/// In-process config service.
///
/// Versions are per file and keep increasing across delete and
/// re-publish, so a long-poll with a stale version always sees the change.
/// A file that was never published reports version 0.
pub struct MemoryConfigService {
    files: Mutex<BTreeMap<ConfigFileId, StoredFile>>,
    generation: watch::Sender<u64>,
    idle_timeout: Duration,
    faults: Mutex<Faults>,
    fetch_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl Default for MemoryConfigService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigService {
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    /// Long-polls without changes return `NoChange` after `idle_timeout`
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            files: Mutex::new(BTreeMap::new()),
            generation,
            idle_timeout,
            faults: Mutex::new(Faults::default()),
            fetch_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    /// Release `content` as the new state of a file. Returns its version.
    pub fn publish(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
        content: &str,
    ) -> u64 {
        self.store(ConfigFileId::new(namespace, group, file_name), |stored| {
            stored.content = Some(content.to_string());
            stored.encrypted = false;
            stored.tags.clear();
        })
    }

    /// Release a file carrying encryption metadata. `file.version` is ignored.
    pub fn publish_file(
        &self,
        file: ConfigFile,
    ) -> u64 {
        self.store(file.id, |stored| {
            stored.content = Some(file.content);
            stored.encrypted = file.encrypted;
            stored.tags = file.tags;
        })
    }

    /// Remove a file. Returns the tombstone version, `None` if it was absent.
    pub fn delete(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
    ) -> Option<u64> {
        let id = ConfigFileId::new(namespace, group, file_name);
        let exists = self.files.lock().get(&id).is_some_and(|f| f.content.is_some());
        if !exists {
            return None;
        }

        Some(self.store(id, |stored| {
            stored.content = None;
            stored.tags.clear();
        }))
    }

    fn store(
        &self,
        id: ConfigFileId,
        update: impl FnOnce(&mut StoredFile),
    ) -> u64 {
        let version = {
            let mut files = self.files.lock();
            let stored = files.entry(id.clone()).or_default();
            update(stored);
            stored.version += 1;
            stored.version
        };
        debug!(file = %id, version, "memory service updated file");

        self.generation.send_modify(|g| *g += 1);
        version
    }

    /// Fail the next `n` `fetch_file` calls
    pub fn fail_next_fetches(
        &self,
        n: usize,
    ) {
        self.faults.lock().fetch = n;
    }

    /// Fail the next `n` `list_files` calls
    pub fn fail_next_lists(
        &self,
        n: usize,
    ) {
        self.faults.lock().list = n;
    }

    /// Fail the next `n` `long_poll_watch` calls
    pub fn fail_next_polls(
        &self,
        n: usize,
    ) {
        self.faults.lock().poll = n;
    }

    /// Answer the next long-poll with a status the engine does not know
    pub fn reply_unrecognized(
        &self,
        code: u32,
        info: &str,
    ) {
        self.faults.lock().unrecognized = Some((code, info.to_string()));
        self.generation.send_modify(|g| *g += 1);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    fn take_fault(
        &self,
        pick: impl FnOnce(&mut Faults) -> &mut usize,
    ) -> bool {
        let mut faults = self.faults.lock();
        let remaining = pick(&mut faults);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    fn current_version(
        &self,
        id: &ConfigFileId,
    ) -> u64 {
        self.files.lock().get(id).map(|f| f.version).unwrap_or(0)
    }

    fn first_changed(
        &self,
        files: &[WatchedVersion],
    ) -> Option<WatchResponse> {
        files.iter().find_map(|w| {
            let version = self.current_version(&w.id);
            (version != w.version).then(|| WatchResponse::Changed {
                id: w.id.clone(),
                version,
            })
        })
    }
}

#[async_trait]
impl ConfigService for MemoryConfigService {
    async fn fetch_file(
        &self,
        id: &ConfigFileId,
    ) -> Result<Option<ConfigFile>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(|f| &mut f.fetch) {
            return Err(ServiceError::Unavailable(format!("fetch {id}")).into());
        }

        let files = self.files.lock();
        let file = files.get(id).and_then(|stored| {
            let content = stored.content.clone()?;
            Some(ConfigFile {
                id: id.clone(),
                content,
                version: stored.version,
                md5: String::new(),
                encrypted: stored.encrypted,
                tags: stored.tags.clone(),
            })
        });
        Ok(file)
    }

    async fn list_files(
        &self,
        namespace: &str,
        group: &str,
    ) -> Result<Vec<ConfigFileInfo>> {
        if self.take_fault(|f| &mut f.list) {
            return Err(ServiceError::Unavailable(format!("list {namespace}/{group}")).into());
        }

        let files = self.files.lock();
        let infos = files
            .iter()
            .filter(|(id, stored)| id.namespace == namespace && id.group == group && stored.content.is_some())
            .map(|(id, stored)| ConfigFileInfo {
                file_name: id.file_name.clone(),
                version: stored.version,
            })
            .collect();
        Ok(infos)
    }

    async fn long_poll_watch(
        &self,
        files: &[WatchedVersion],
    ) -> Result<WatchResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(|f| &mut f.poll) {
            return Err(ServiceError::Unavailable("watch".into()).into());
        }

        // Subscribe before checking so a release in between still wakes us
        let mut rx = self.generation.subscribe();
        let idle = sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            if let Some((code, info)) = self.faults.lock().unrecognized.take() {
                return Ok(WatchResponse::Unrecognized { code, info });
            }
            if let Some(changed) = self.first_changed(files) {
                return Ok(changed);
            }

            tokio::select! {
                _ = &mut idle => return Ok(WatchResponse::NoChange),
                res = rx.changed() => {
                    if res.is_err() {
                        return Ok(WatchResponse::NoChange);
                    }
                }
            }
        }
    }
}
