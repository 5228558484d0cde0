//! Main CacheStorage implementation

use super::entry::{CacheEntry, EntryBody, EntryDraft};
use super::error::StorageError;
use super::index::{self, IndexSnapshot};
use super::legacy;
use super::locks::UrlLocks;
use super::resource::{BodyResource, ResourceTracker};
use super::stats::StorageStats;
use super::utils;
use crate::constants::{DEFAULT_SAVE_DELAY, INDEX_FILE_NAME};
use chrono::SubsecRound;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Persistent URL -> response cache with content-addressed body files.
///
/// Cloning is cheap and every clone shares the same state.
///
/// - `get` is served from memory only.
/// - `put`, `update` and `remove` mutate the map under a single lock and
///   schedule a debounced write of `storage-keys.json`.
/// - Body files displaced by a mutation are deleted by `reclaim` once no
///   entry clone references them anymore.
#[derive(Clone)]
pub struct CacheStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    dir: PathBuf,
    index_path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
    // Held across a whole `put`/`update`/`remove`; `entries` only around map access.
    url_locks: UrlLocks,
    // Separate from `entries` so a slow index write never blocks lookups.
    index_lock: tokio::sync::Mutex<()>,
    pending_changes: AtomicU64,
    saves: AtomicU64,
    save_delay: Duration,
    resources: ResourceTracker,
    runtime: Handle,
}

impl CacheStorage {
    /// Open (or create) the cache in `dir` with the default 5 second save delay
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open_with_delay(dir, DEFAULT_SAVE_DELAY).await
    }

    /// Open (or create) the cache in `dir`.
    ///
    /// Only a failure to create the directory is returned; an unreadable
    /// index is logged and the cache starts empty.
    pub async fn open_with_delay(
        dir: impl Into<PathBuf>,
        save_delay: Duration,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let storage = Self {
            inner: Arc::new(StorageInner {
                index_path: dir.join(INDEX_FILE_NAME),
                dir,
                entries: Mutex::new(HashMap::new()),
                url_locks: UrlLocks::new(),
                index_lock: tokio::sync::Mutex::new(()),
                pending_changes: AtomicU64::new(0),
                saves: AtomicU64::new(0),
                save_delay,
                resources: ResourceTracker::new(),
                runtime: Handle::current(),
            }),
        };

        match utils::remove_stray_temp_files(&storage.inner.dir).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Removed stray temporary files"),
            Err(e) => warn!(error = %e, "Failed to scan cache directory for temporary files"),
        }

        storage.load().await;
        Ok(storage)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn index_path(&self) -> &Path {
        &self.inner.index_path
    }

    /// Look up an entry. Never touches the disk.
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.inner.entries.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store an entry for `url`, replacing any previous one.
    ///
    /// The body is written to its content-addressed file before the map is
    /// touched; an I/O failure leaves the map unchanged and is returned.
    pub async fn put(&self, url: &str, draft: EntryDraft) -> Result<(), StorageError> {
        let _guard = self.inner.url_locks.lock(url).await;
        let entry = self.normalize(url, draft).await?;
        self.install(entry);
        self.schedule_save();
        Ok(())
    }

    /// Replace the entry for `url` with what `update_fn` derives from the
    /// current one (or from nothing).
    ///
    /// No other mutation of `url` can land between the read of the current
    /// entry and the install of the derived one. Returning
    /// `current.to_draft()` keeps the body file; it is then not considered
    /// displaced.
    pub async fn update<F>(&self, url: &str, update_fn: F) -> Result<(), StorageError>
    where
        F: FnOnce(Option<&CacheEntry>) -> EntryDraft,
    {
        let _guard = self.inner.url_locks.lock(url).await;
        let draft = {
            let current = self.get(url);
            update_fn(current.as_ref())
        };
        let entry = self.normalize(url, draft).await?;
        self.install(entry);
        self.schedule_save();
        Ok(())
    }

    /// Drop the entry for `url`. Its body file is disposed later by `reclaim`.
    ///
    /// Returns whether an entry was present.
    pub async fn remove(&self, url: &str) -> bool {
        self.remove_if(url, |_| true).await
    }

    /// Drop the entry for `url` only if `predicate` accepts the current one.
    ///
    /// The check and the removal happen under the URL's mutation lock.
    pub async fn remove_if<F>(&self, url: &str, predicate: F) -> bool
    where
        F: FnOnce(&CacheEntry) -> bool,
    {
        let _guard = self.inner.url_locks.lock(url).await;
        let removed = {
            let mut entries = self.inner.entries.lock();
            let accepted = entries.get(url).map_or(false, |current| predicate(current));
            if accepted {
                entries.remove(url)
            } else {
                None
            }
        };
        match removed {
            Some(entry) => {
                self.inner.resources.enroll(&entry.resource);
                self.schedule_save();
                debug!(url, "Removed cache entry");
                true
            }
            None => false,
        }
    }

    /// Dispose of displaced body files nobody references anymore.
    ///
    /// Safe to call at any time; returns 0 when nothing is pending.
    pub async fn reclaim(&self) -> usize {
        let reclaimed = self.inner.resources.reclaim().await;
        if reclaimed > 0 {
            debug!(reclaimed, "Reclaimed displaced body files");
        }
        reclaimed
    }

    /// Write the index now if there are unsaved changes.
    ///
    /// Returns whether a write succeeded.
    pub async fn flush(&self) -> bool {
        self.inner.persist().await
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            entries: self.len(),
            pending_changes: self.inner.pending_changes.load(Ordering::SeqCst),
            saves: self.inner.saves.load(Ordering::SeqCst),
            disposal_candidates: self.inner.resources.pending(),
        }
    }

    async fn normalize(&self, url: &str, draft: EntryDraft) -> Result<CacheEntry, StorageError> {
        let EntryDraft {
            request_date,
            response_date,
            status_line,
            headers,
            body,
            variant_map,
        } = draft;

        let resource = match body {
            EntryBody::Resource(resource) => resource,
            EntryBody::Bytes(bytes) => self.store_body(&bytes).await?,
            EntryBody::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await?;
                self.store_body(&bytes).await?
            }
        };

        Ok(CacheEntry {
            url: url.to_string(),
            request_date: request_date.trunc_subsecs(0),
            response_date: response_date.trunc_subsecs(0),
            status_line,
            headers,
            resource,
            variant_map,
        })
    }

    async fn store_body(&self, bytes: &[u8]) -> Result<Arc<BodyResource>, StorageError> {
        let path = self.inner.dir.join(utils::body_file_name(bytes));
        // Interned before the write so a concurrent reclaim sees the path as live.
        let resource = self.inner.resources.intern(path).await;
        utils::write_file_atomic(resource.path(), bytes).await?;
        Ok(resource)
    }

    fn install(&self, entry: CacheEntry) {
        let resource = Arc::clone(&entry.resource);
        let previous = self.inner.entries.lock().insert(entry.url.clone(), entry);
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous.resource, &resource) {
                self.inner.resources.enroll(&previous.resource);
            }
        }
    }

    fn schedule_save(&self) {
        // Only the transition from 0 arms the timer; later mutations ride along.
        if self.inner.pending_changes.fetch_add(1, Ordering::SeqCst) > 0 {
            return;
        }
        StorageInner::arm_save(&self.inner);
    }

    async fn load(&self) {
        match index::load_index(&self.inner.index_path).await {
            Ok(Some(snapshot)) => match self.restore(snapshot).await {
                Ok(count) => info!(
                    entries = count,
                    path = %self.inner.index_path.display(),
                    "Loaded cache index"
                ),
                Err(e) => warn!(
                    error = %e,
                    path = %self.inner.index_path.display(),
                    "Malformed cache index, starting with an empty cache"
                ),
            },
            Ok(None) => self.import_legacy().await,
            Err(e) => warn!(
                error = %e,
                path = %self.inner.index_path.display(),
                "Failed to read cache index, starting with an empty cache"
            ),
        }
    }

    async fn restore(&self, snapshot: IndexSnapshot) -> Result<usize, StorageError> {
        let mut restored = HashMap::with_capacity(snapshot.len());
        for (url, record) in snapshot {
            let resource = self
                .inner
                .resources
                .intern(record.resource_path(&self.inner.dir))
                .await;
            let entry = record.into_entry(url.clone(), resource)?;
            restored.insert(url, entry);
        }
        let count = restored.len();
        *self.inner.entries.lock() = restored;
        Ok(count)
    }

    async fn import_legacy(&self) {
        let legacy = match legacy::read_legacy_index(&self.inner.dir).await {
            Ok(Some(legacy)) => legacy,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read legacy cache index, starting with an empty cache");
                return;
            }
        };

        let mut imported = 0u64;
        let mut superseded = Vec::new();
        for record in legacy.entries {
            let url = record.url.clone();
            let old_path = record.body_path(&self.inner.dir);
            let body = match tokio::fs::read(&old_path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, path = %old_path.display(), error = %e, "Skipping legacy entry without body");
                    continue;
                }
            };
            let entry = match record.into_draft(body) {
                Ok(draft) => self.normalize(&url, draft).await,
                Err(e) => Err(e),
            };
            match entry {
                Ok(entry) => {
                    if entry.body_path() != old_path {
                        superseded.push(old_path);
                    }
                    self.install(entry);
                    imported += 1;
                }
                Err(e) => warn!(url = %url, error = %e, "Skipping unreadable legacy entry"),
            }
        }

        self.inner
            .pending_changes
            .fetch_add(imported.max(1), Ordering::SeqCst);
        if !self.inner.persist().await {
            return;
        }
        info!(entries = imported, "Migrated legacy cache index");

        for path in superseded {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove superseded legacy body file");
            }
        }
        if let Err(e) = tokio::fs::remove_file(legacy::legacy_index_path(&self.inner.dir)).await {
            warn!(error = %e, "Failed to remove legacy cache index");
        }
    }
}

impl StorageInner {
    fn arm_save(inner: &Arc<StorageInner>) {
        let weak = Arc::downgrade(inner);
        let delay = inner.save_delay;
        inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // A failed write leaves the changes pending; nothing else would re-arm.
            if !inner.persist().await && inner.pending_changes.load(Ordering::SeqCst) > 0 {
                StorageInner::arm_save(&inner);
            }
        });
    }

    async fn persist(&self) -> bool {
        let _guard = self.index_lock.lock().await;
        // Reset before the snapshot: anything arriving from here on re-arms a save.
        let collapsed = self.pending_changes.swap(0, Ordering::SeqCst);
        if collapsed == 0 {
            return false;
        }

        let snapshot = {
            let entries = self.entries.lock();
            index::snapshot(entries.values())
        };

        match index::save_index(&self.index_path, &snapshot).await {
            Ok(()) => {
                self.saves.fetch_add(1, Ordering::SeqCst);
                debug!(
                    entries = snapshot.len(),
                    collapsed,
                    "Persisted cache index"
                );
                true
            }
            Err(e) => {
                // Put the changes back so a later save or `flush` retries them.
                self.pending_changes.fetch_add(collapsed, Ordering::SeqCst);
                warn!(
                    error = %e,
                    path = %self.index_path.display(),
                    pending = collapsed,
                    "Failed to persist cache index"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("dir", &self.inner.dir)
            .field("stats", &self.stats())
            .finish()
    }
}
