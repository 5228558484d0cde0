// Error types module

use crate::fetch::TransportError;
use crate::storage::StorageError;
use thiserror::Error;

/// Failure of an image fetch, as seen by callers of `ImageFetcher`
///
/// Transport failures are split by the phase that failed so callers can
/// decide whether a retry makes sense; the fetcher itself never retries.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The exchange violated HTTP (malformed response, bad redirect, ...)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No connection to the origin could be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// The response body could not be read
    #[error("Read error: {0}")]
    Read(String),

    /// The exchange completed with a non-success status
    #[error("{uri} answered with status {status}")]
    Status { uri: String, status: u16 },

    #[error("Invalid URI {0:?}")]
    InvalidUri(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// Whether a cache-only fetch found nothing usable in the cache
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, FetchError::Status { status: 504, .. })
    }
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(msg) => FetchError::Protocol(msg),
            TransportError::Connection(msg) => FetchError::Connection(msg),
            TransportError::Read(msg) => FetchError::Read(msg),
        }
    }
}
