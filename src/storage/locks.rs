//! Per-URL mutation locks
//!
//! `put`, `update` and `remove` for one URL hold that URL's lock from the
//! read of the current entry until the new one is installed, so a
//! read-modify-write never interleaves with another mutation of the same
//! key. Different URLs never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct UrlLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UrlLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `url`
    pub async fn lock(&self, url: &str) -> UrlGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(url.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        UrlGuard {
            owner: self,
            url: url.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of URLs with a holder or a waiter
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct UrlGuard<'a> {
    owner: &'a UrlLocks,
    url: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UrlGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.locks.lock();
        // Only the table and this guard still point at the lock: nobody waits.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.url);
        }
    }
}
