// imgcache: persistent HTTP image cache
//
// `storage` keeps response metadata and content-addressed bodies on disk;
// `fetch` puts a caching HTTP client and the `ImageFetcher` façade on top.

pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod storage;

pub use error::FetchError;
pub use fetch::ImageFetcher;
