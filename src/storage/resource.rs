//! Body file handles and deferred disposal
//!
//! Every body file on disk is represented by exactly one live
//! `Arc<BodyResource>`. The entry map holds one strong reference per entry
//! using the file; callers that cloned an entry out of the map (for example a
//! response still reading the body) hold more.
//!
//! When an entry stops referencing a handle, the handle is enrolled as a
//! disposal candidate through a `Weak`. `reclaim` later deletes the files of
//! candidates whose strong count has dropped to zero, unless a new live handle
//! for the same content-addressed path has appeared in the meantime.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Handle to a content-addressed body file
#[derive(Debug, PartialEq, Eq)]
pub struct BodyResource {
    path: PathBuf,
}

impl BodyResource {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, e.g. `<sha1>.png`
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Read the whole body into memory
    pub async fn read(&self) -> io::Result<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }
}

struct Candidate {
    handle: Weak<BodyResource>,
    path: PathBuf,
}

/// Registry of live body handles plus the disposal candidate set
pub(crate) struct ResourceTracker {
    // Held across the liveness check and the file deletion in `reclaim`, and
    // by `intern` before a body file is written, so a re-stored body cannot be
    // deleted underneath a new entry.
    live: tokio::sync::Mutex<HashMap<PathBuf, Weak<BodyResource>>>,
    candidates: Mutex<Vec<Candidate>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            live: tokio::sync::Mutex::new(HashMap::new()),
            candidates: Mutex::new(Vec::new()),
        }
    }

    /// Return the live handle for `path`, creating it if none exists
    pub async fn intern(&self, path: PathBuf) -> Arc<BodyResource> {
        let mut live = self.live.lock().await;
        if let Some(existing) = live.get(&path).and_then(Weak::upgrade) {
            return existing;
        }
        let resource = Arc::new(BodyResource::new(path.clone()));
        live.insert(path, Arc::downgrade(&resource));
        resource
    }

    /// Mark a handle that an entry no longer references
    pub fn enroll(&self, displaced: &Arc<BodyResource>) {
        let mut candidates = self.candidates.lock();
        let ptr = Arc::as_ptr(displaced);
        if candidates.iter().any(|c| c.handle.as_ptr() == ptr) {
            return;
        }
        candidates.push(Candidate {
            handle: Arc::downgrade(displaced),
            path: displaced.path().to_path_buf(),
        });
    }

    /// Number of enrolled handles not yet reclaimed
    pub fn pending(&self) -> usize {
        self.candidates.lock().len()
    }

    /// Dispose of every candidate that has become unreachable.
    ///
    /// Returns the number of handles disposed. Deletion failures are logged
    /// and not retried.
    pub async fn reclaim(&self) -> usize {
        let unreachable: Vec<Candidate> = {
            let mut candidates = self.candidates.lock();
            let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut *candidates)
                .into_iter()
                .partition(|c| c.handle.strong_count() == 0);
            *candidates = alive;
            dead
        };

        if unreachable.is_empty() {
            return 0;
        }

        let mut live = self.live.lock().await;
        for candidate in &unreachable {
            let reused = live
                .get(&candidate.path)
                .map_or(false, |handle| handle.strong_count() > 0);
            if reused {
                debug!(
                    path = %candidate.path.display(),
                    "Body file is referenced by a newer entry, keeping it"
                );
                continue;
            }

            live.remove(&candidate.path);
            match tokio::fs::remove_file(&candidate.path).await {
                Ok(()) => {
                    debug!(path = %candidate.path.display(), "Disposed body file");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %candidate.path.display(),
                        error = %e,
                        "Failed to delete disposed body file"
                    );
                }
            }
        }
        live.retain(|_, handle| handle.strong_count() > 0);

        unreachable.len()
    }
}
