//! Persistent cache storage engine
//!
//! An on-disk map from request URL to HTTP response metadata plus a
//! content-addressed body file:
//! - `storage-keys.json` holds a debounced JSON snapshot of the map
//! - each distinct body lives in `<sha1-hex>[.<ext>]` inside the cache directory
//! - body files displaced by `put`/`update`/`remove` are deleted by `reclaim`
//!   only once every clone of the owning entry has been dropped

// Re-export main types
pub use self::engine::CacheStorage;
pub use self::entry::{
    format_http_date, parse_http_date, CacheEntry, EntryBody, EntryDraft, Header, StatusLine,
};
pub use self::error::StorageError;
pub use self::resource::BodyResource;
pub use self::stats::StorageStats;
pub use self::utils::{body_file_name, content_digest};

mod engine;
mod entry;
mod error;
mod index;
mod legacy;
mod locks;
mod resource;
mod stats;
mod utils;
