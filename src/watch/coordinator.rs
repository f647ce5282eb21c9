use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;

use regex::Regex;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::is_wildcard;
use super::parse_key;
use super::wildcard_to_regex;
use super::ChangeCallback;
use super::ChangeType;
use super::ConfigFileChangeEvent;
use super::ConfigFilesWatcher;
use super::Revision;
use super::WatchContext;
use crate::ConfigFileId;
use crate::Error;
use crate::Result;
use crate::WatchError;

/// Key-value view over config files.
///
/// Keys resolve to files through [`parse_key`]. Each distinct file, or
/// wildcard pattern, gets one watch with its own [`Revision`]; watches are
/// created on first use and shared by later calls. A new watch starts at
/// revision 1, so the first [`watch_prefix`](Self::watch_prefix) with
/// revision 0 returns at once and lets the caller load the initial state.
pub struct WatchCoordinator {
    ctx: WatchContext,
    watches: RwLock<HashMap<ConfigFileId, Arc<KeyWatch>>>,
    shutdown: CancellationToken,
}

impl WatchCoordinator {
    pub(crate) fn new(
        ctx: WatchContext,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            ctx,
            watches: RwLock::new(HashMap::new()),
            shutdown: parent.child_token(),
        }
    }

    /// Map every key to the file it addresses
    pub fn resolve_keys(
        &self,
        prefix: &str,
        keys: &[String],
    ) -> BTreeMap<String, ConfigFileId> {
        keys.iter().map(|key| (key.clone(), parse_key(prefix, key))).collect()
    }

    /// Wait until anything addressed by `keys` changes.
    ///
    /// Returns at once when the key set is already past `last_revision`,
    /// otherwise on the first revision bump of any of its watches. The
    /// result is the highest revision across the key set.
    ///
    /// Failing to set up a watch aborts the call. When `cancel` fires the
    /// call fails with [`WatchError::Cancelled`] and watches of the key set
    /// that no other call is waiting on are torn down.
    pub async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        last_revision: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if keys.is_empty() {
            return Err(WatchError::EmptyKeySet.into());
        }
        if self.shutdown.is_cancelled() {
            return Err(WatchError::ShuttingDown.into());
        }

        let ids: BTreeSet<ConfigFileId> = self.resolve_keys(prefix, keys).into_values().collect();
        let watches = self.ensure_watches(&ids).await?;

        let result = self.wait_any(&watches, last_revision, cancel).await;
        drop(watches);

        if matches!(result, Err(Error::Watch(WatchError::Cancelled))) {
            self.release(&ids).await;
        }
        result
    }

    async fn wait_any(
        &self,
        watches: &[Arc<KeyWatch>],
        last_revision: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let observed: Vec<(Revision, u64)> = watches
            .iter()
            .map(|w| {
                let revision = w.revision().clone();
                let current = revision.current();
                (revision, current)
            })
            .collect();
        let aggregate = || observed.iter().map(|(r, _)| r.current()).max().unwrap_or_default();

        let seen = observed.iter().map(|(_, current)| *current).max().unwrap_or_default();
        if seen > last_revision {
            return Ok(seen);
        }

        let waits = observed.iter().map(|(revision, current)| Box::pin(revision.wait_past(*current, cancel)));

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(WatchError::ShuttingDown.into()),
            (woken, _, _) = futures::future::select_all(waits) => {
                woken?;
                Ok(aggregate())
            }
        }
    }

    /// Existing watches for `ids`, creating the missing ones
    async fn ensure_watches(
        &self,
        ids: &BTreeSet<ConfigFileId>,
    ) -> Result<Vec<Arc<KeyWatch>>> {
        {
            let watches = self.watches.read().await;
            let existing: Vec<_> = ids.iter().filter_map(|id| watches.get(id).cloned()).collect();
            if existing.len() == ids.len() {
                return Ok(existing);
            }
        }

        let mut watches = self.watches.write().await;
        let mut resolved = Vec::with_capacity(ids.len());
        // Registered only once every key is set up; on error the dropped ones stop their loops
        let mut created = Vec::new();
        for id in ids {
            let watch = match watches.get(id) {
                Some(watch) => watch.clone(),
                None => {
                    let watch = Arc::new(self.create_watch(id).await?);
                    created.push((id.clone(), watch.clone()));
                    watch
                }
            };
            resolved.push(watch);
        }
        watches.extend(created);
        Ok(resolved)
    }

    /// Drop watches of `ids` nobody else holds
    async fn release(
        &self,
        ids: &BTreeSet<ConfigFileId>,
    ) {
        let mut watches = self.watches.write().await;
        for id in ids {
            // The map holds one reference; more means another call is waiting
            if watches.get(id).is_some_and(|w| Arc::strong_count(w) == 1) {
                watches.remove(id);
                debug!(key = %id, "released watch after cancellation");
            }
        }
    }

    async fn create_watch(
        &self,
        id: &ConfigFileId,
    ) -> Result<KeyWatch> {
        if is_wildcard(&id.file_name) {
            let watch = WildcardWatch::start(&self.ctx, id.clone(), &self.shutdown).await?;
            return Ok(KeyWatch::Wildcard(watch));
        }

        let revision = Revision::new();
        let watcher = ConfigFilesWatcher::start(
            &self.ctx,
            &id.namespace,
            &id.group,
            &[id.file_name.clone()],
            vec![bump_on_change(revision.clone())],
            &self.shutdown,
        )
        .await?;
        revision.bump();

        Ok(KeyWatch::File {
            revision,
            _watcher: watcher,
        })
    }

    /// Current values of `keys`.
    ///
    /// A concrete key maps `/{group}/{fileName}` to the file content; files
    /// that are absent or fail to load are skipped. A wildcard key maps
    /// `/{group}/{pattern}` to a pretty-printed JSON array of every
    /// matching file whose content is a JSON object. Failing to list the
    /// group of a wildcard key aborts the call.
    pub async fn get_values(
        &self,
        prefix: &str,
        keys: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();

        for (key, id) in self.resolve_keys(prefix, keys) {
            let value_key = format!("/{}/{}", id.group, id.file_name);

            if is_wildcard(&id.file_name) {
                let objects = self.matching_objects(&id).await?;
                let rendered = serde_json::to_string_pretty(&objects).map_err(|e| Error::Fatal(e.to_string()))?;
                values.insert(value_key, rendered);
                continue;
            }

            match self.ctx.service.fetch_file(&id).await {
                Ok(Some(file)) => {
                    values.insert(value_key, file.decoded_content(self.ctx.decryptor()));
                }
                Ok(None) => debug!(%key, file = %id, "file not released, skipping"),
                Err(e) => warn!(%key, file = %id, "failed to read file: {}", e),
            }
        }

        Ok(values)
    }

    async fn matching_objects(
        &self,
        pattern_id: &ConfigFileId,
    ) -> Result<Vec<Value>> {
        let pattern = wildcard_to_regex(&pattern_id.file_name)?;
        let names = matching_files(&self.ctx, pattern_id, &pattern).await?;

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let id = ConfigFileId::new(pattern_id.namespace.as_str(), pattern_id.group.as_str(), name);
            let content = match self.ctx.service.fetch_file(&id).await {
                Ok(Some(file)) => file.decoded_content(self.ctx.decryptor()),
                Ok(None) => continue,
                Err(e) => {
                    warn!(file = %id, "failed to read file: {}", e);
                    continue;
                }
            };
            if content.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(object) => objects.push(Value::Object(object)),
                Err(e) => warn!(file = %id, "content is not a JSON object, skipping: {}", e),
            }
        }
        Ok(objects)
    }

    /// Concrete files currently under watch, wildcard members included
    pub async fn watched_files(&self) -> Vec<ConfigFileId> {
        let watches = self.watches.read().await;
        let mut files: Vec<ConfigFileId> = watches
            .iter()
            .flat_map(|(id, watch)| match watch.as_ref() {
                KeyWatch::File { .. } => vec![id.clone()],
                KeyWatch::Wildcard(wildcard) => wildcard.members(),
            })
            .collect();
        files.sort();
        files
    }

    /// Stop every watch and fail pending and future waits
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for WatchCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Watch behind one resolved key
enum KeyWatch {
    File {
        revision: Revision,
        _watcher: ConfigFilesWatcher,
    },
    Wildcard(Arc<WildcardWatch>),
}

impl KeyWatch {
    fn revision(&self) -> &Revision {
        match self {
            KeyWatch::File { revision, .. } => revision,
            KeyWatch::Wildcard(wildcard) => &wildcard.revision,
        }
    }
}

fn bump_on_change(revision: Revision) -> ChangeCallback {
    Arc::new(move |event: &ConfigFileChangeEvent| {
        if event.change_type != ChangeType::NotChanged {
            revision.bump();
        }
    })
}

/// Names of the files in the group of `pattern_id` that `pattern` matches, sorted
async fn matching_files(
    ctx: &WatchContext,
    pattern_id: &ConfigFileId,
    pattern: &Regex,
) -> Result<BTreeSet<String>> {
    let listing = ctx.service.list_files(&pattern_id.namespace, &pattern_id.group).await?;
    Ok(listing
        .into_iter()
        .map(|info| info.file_name)
        .filter(|name| pattern.is_match(name))
        .collect())
}

/// Membership of a wildcard key.
///
/// Every matching file has its own watcher. A rescan task re-lists the
/// group periodically; joins and departures bump the shared revision once
/// per scan. A member reporting `Deleted` leaves immediately.
struct WildcardWatch {
    id: ConfigFileId,
    pattern: Regex,
    revision: Revision,
    members: parking_lot::Mutex<HashMap<String, ConfigFilesWatcher>>,
    cancel: CancellationToken,
}

impl WildcardWatch {
    async fn start(
        ctx: &WatchContext,
        id: ConfigFileId,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let pattern = wildcard_to_regex(&id.file_name)?;
        let names = matching_files(ctx, &id, &pattern).await.map_err(|e| WatchError::Setup {
            file: id.to_string(),
            source: Box::new(e),
        })?;

        let watch = Arc::new(Self {
            id,
            pattern,
            revision: Revision::new(),
            members: parking_lot::Mutex::new(HashMap::new()),
            cancel: parent.child_token(),
        });

        for name in names {
            let watcher = watch.start_member(ctx, &name).await?;
            watch.members.lock().insert(name, watcher);
        }
        watch.revision.bump();

        info!(
            pattern = %watch.id,
            members = watch.members.lock().len(),
            "wildcard watch started"
        );

        tokio::spawn(rescan_loop(Arc::downgrade(&watch), ctx.clone(), watch.cancel.clone()));
        Ok(watch)
    }

    async fn start_member(
        self: &Arc<Self>,
        ctx: &WatchContext,
        file_name: &str,
    ) -> Result<ConfigFilesWatcher> {
        ConfigFilesWatcher::start(
            ctx,
            &self.id.namespace,
            &self.id.group,
            &[file_name.to_string()],
            vec![member_listener(Arc::downgrade(self))],
            &self.cancel,
        )
        .await
    }

    fn members(&self) -> Vec<ConfigFileId> {
        self.members
            .lock()
            .keys()
            .map(|name| ConfigFileId::new(self.id.namespace.as_str(), self.id.group.as_str(), name.as_str()))
            .collect()
    }

    /// Reconcile membership with the group listing
    async fn rescan(
        self: &Arc<Self>,
        ctx: &WatchContext,
    ) {
        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            listed = matching_files(ctx, &self.id, &self.pattern) => listed,
        };
        let remote = match listed {
            Ok(remote) => remote,
            Err(e) => {
                warn!(pattern = %self.id, "failed to list group for wildcard rescan: {}", e);
                return;
            }
        };

        let (joined, left): (Vec<String>, Vec<String>) = {
            let members = self.members.lock();
            (
                remote.iter().filter(|name| !members.contains_key(*name)).cloned().collect(),
                members.keys().filter(|name| !remote.contains(*name)).cloned().collect(),
            )
        };

        let mut changed = false;
        for name in left {
            if self.members.lock().remove(&name).is_some() {
                info!(pattern = %self.id, file = %name, "file left wildcard watch");
                changed = true;
            }
        }
        for name in joined {
            match self.start_member(ctx, &name).await {
                Ok(watcher) => {
                    self.members.lock().insert(name.clone(), watcher);
                    info!(pattern = %self.id, file = %name, "file joined wildcard watch");
                    changed = true;
                }
                Err(e) => warn!(pattern = %self.id, file = %name, "failed to watch new file: {}", e),
            }
        }

        if changed {
            self.revision.bump();
        }
    }
}

impl Drop for WildcardWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn member_listener(watch: Weak<WildcardWatch>) -> ChangeCallback {
    Arc::new(move |event: &ConfigFileChangeEvent| {
        let Some(watch) = watch.upgrade() else {
            return;
        };

        match event.change_type {
            ChangeType::NotChanged => {}
            ChangeType::Deleted => {
                watch.members.lock().remove(&event.file.file_name);
                info!(pattern = %watch.id, file = %event.file.file_name, "file deleted, left wildcard watch");
                watch.revision.bump();
            }
            ChangeType::Added | ChangeType::Modified => {
                watch.revision.bump();
            }
        }
    })
}

async fn rescan_loop(
    watch: Weak<WildcardWatch>,
    ctx: WatchContext,
    cancel: CancellationToken,
) {
    let interval = ctx.config.watch.wildcard_rescan_interval();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }

        let Some(watch) = watch.upgrade() else {
            break;
        };
        watch.rescan(&ctx).await;
    }
    debug!("wildcard rescan stopped");
}
