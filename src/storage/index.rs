//! JSON index (`storage-keys.json`) persistence
//!
//! The index is a snapshot of the entry map: one object per request URL.
//! It is only read at startup; while the process runs, the in-memory map is
//! authoritative.

use super::entry::{format_http_date, parse_http_date, CacheEntry, Header, StatusLine};
use super::error::StorageError;
use super::resource::BodyResource;
use super::utils::write_file_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persisted form of a `CacheEntry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub request_date: String,
    pub response_date: String,
    pub status_line: String,
    pub headers: Vec<String>,
    pub resource: PathBuf,
    #[serde(default)]
    pub variant_map: BTreeMap<String, String>,
}

/// Index contents keyed by request URL
pub type IndexSnapshot = BTreeMap<String, IndexRecord>;

impl IndexRecord {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            request_date: format_http_date(&entry.request_date),
            response_date: format_http_date(&entry.response_date),
            status_line: entry.status_line.to_string(),
            headers: entry.headers.iter().map(Header::to_string).collect(),
            resource: entry.resource.path().to_path_buf(),
            variant_map: entry.variant_map.clone(),
        }
    }

    /// Body path, resolving relative paths against the cache directory
    pub fn resource_path(&self, dir: &Path) -> PathBuf {
        if self.resource.is_absolute() {
            self.resource.clone()
        } else {
            dir.join(&self.resource)
        }
    }

    /// Rebuild the entry; the body file is trusted to exist
    pub fn into_entry(
        self,
        url: String,
        resource: Arc<BodyResource>,
    ) -> Result<CacheEntry, StorageError> {
        let status_line: StatusLine = self.status_line.parse()?;
        let headers = self
            .headers
            .iter()
            .map(|line| line.parse::<Header>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CacheEntry {
            url,
            request_date: parse_http_date(&self.request_date)?,
            response_date: parse_http_date(&self.response_date)?,
            status_line,
            headers,
            resource,
            variant_map: self.variant_map,
        })
    }
}

/// Build a snapshot from the live entries
pub fn snapshot<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>) -> IndexSnapshot {
    entries
        .into_iter()
        .map(|entry| (entry.url.clone(), IndexRecord::from_entry(entry)))
        .collect()
}

/// Save a snapshot to the index file atomically
pub async fn save_index(path: &Path, snapshot: &IndexSnapshot) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    write_file_atomic(path, &json).await?;
    Ok(())
}

/// Load the index file.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn load_index(path: &Path) -> Result<Option<IndexSnapshot>, StorageError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: IndexSnapshot = serde_json::from_slice(&data)?;
    Ok(Some(snapshot))
}
