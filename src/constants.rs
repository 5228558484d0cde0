// Constants module - centralized default values for configuration
//
// Defaults shared by the storage engine, the fetch façade and the
// configuration loader live here so the numbers only appear once.

use std::time::Duration;

// =============================================================================
// Storage defaults
// =============================================================================

/// Name of the JSON index inside the cache directory
pub const INDEX_FILE_NAME: &str = "storage-keys.json";

/// Name of the index written by the previous on-disk layout
pub const LEGACY_INDEX_FILE_NAME: &str = "index.json";

/// Default cache directory
pub const DEFAULT_CACHE_DIR: &str = "./image-cache";

/// Delay between the first unsaved mutation and the index write-back
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(5);

/// Largest response body that will be cached (512 MiB)
pub const DEFAULT_MAX_OBJECT_SIZE_BYTES: u64 = 512 * 1024 * 1024;

// =============================================================================
// HTTP defaults
// =============================================================================

/// Default request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default `User-Agent` sent with every image request
pub const DEFAULT_USER_AGENT: &str = concat!("imgcache/", env!("CARGO_PKG_VERSION"));

/// Default `Referer` sent with every image request
pub const DEFAULT_REFERER: &str = "https://imgcache.invalid/";

/// Image media types the downstream decoder understands, in preference order
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// `max-stale` value used for cache-only requests (effectively unbounded)
pub const OFFLINE_MAX_STALE_SECS: u64 = i32::MAX as u64;
