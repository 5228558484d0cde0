//! Import of the previous on-disk layout
//!
//! Older releases kept a versioned `index.json` snapshot whose records point
//! at body files named after the request rather than their content:
//!
//! ```json
//! {"version": 1, "entries": [{"url": "...", "file_path": "...", "status": 200,
//!   "headers": [["Content-Type", "image/png"]], "created_at": 1700000000}]}
//! ```
//!
//! Records are turned into drafts here; the engine re-stores their bodies
//! content-addressed and writes the new index.

use super::entry::{EntryDraft, Header, StatusLine};
use super::error::StorageError;
use crate::constants::LEGACY_INDEX_FILE_NAME;
use chrono::{TimeZone, Utc};
use http::{StatusCode, Version};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
pub struct LegacySnapshot {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<LegacyRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRecord {
    pub url: String,
    pub file_path: PathBuf,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Unix seconds
    pub created_at: i64,
}

impl LegacyRecord {
    /// Body path, resolving relative paths against the cache directory
    pub fn body_path(&self, dir: &Path) -> PathBuf {
        if self.file_path.is_absolute() {
            self.file_path.clone()
        } else {
            dir.join(&self.file_path)
        }
    }

    pub fn into_draft(self, body: Vec<u8>) -> Result<EntryDraft, StorageError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| StorageError::InvalidStatusLine(self.status.to_string()))?;
        let created_at = Utc
            .timestamp_opt(self.created_at, 0)
            .single()
            .ok_or_else(|| StorageError::InvalidDate(self.created_at.to_string()))?;
        let headers = self
            .headers
            .into_iter()
            .map(|(name, value)| Header::new(name, value))
            .collect();

        Ok(EntryDraft::new(StatusLine::new(Version::HTTP_11, status), body)
            .with_dates(created_at, created_at)
            .with_headers(headers))
    }
}

pub fn legacy_index_path(dir: &Path) -> PathBuf {
    dir.join(LEGACY_INDEX_FILE_NAME)
}

/// Read the legacy index, `Ok(None)` when there is none
pub async fn read_legacy_index(dir: &Path) -> Result<Option<LegacySnapshot>, StorageError> {
    let data = match tokio::fs::read(legacy_index_path(dir)).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: LegacySnapshot = serde_json::from_slice(&data)?;
    if snapshot.version != SUPPORTED_VERSION {
        return Err(StorageError::UnsupportedLegacyVersion(snapshot.version));
    }
    Ok(Some(snapshot))
}
