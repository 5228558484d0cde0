//! Storage statistics

use serde::Serialize;

/// Point-in-time view of the storage engine, for logs and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Entries in the in-memory map
    pub entries: usize,
    /// Mutations not yet written to the index
    pub pending_changes: u64,
    /// Index writes completed since startup
    pub saves: u64,
    /// Displaced body handles waiting for `reclaim`
    pub disposal_candidates: usize,
}

impl StorageStats {
    pub fn is_dirty(&self) -> bool {
        self.pending_changes > 0
    }
}
