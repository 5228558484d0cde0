//! Error types for cache storage operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid status line: {0:?}")]
    InvalidStatusLine(String),

    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("Invalid HTTP date: {0:?}")]
    InvalidDate(String),

    #[error("Unsupported legacy index version {0}")]
    UnsupportedLegacyVersion(u32),
}

impl StorageError {
    /// Whether the error came from the filesystem rather than from malformed data
    pub fn is_io(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}
