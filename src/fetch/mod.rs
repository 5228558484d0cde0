//! Fetch side of the image cache
//!
//! `ImageFetcher` is the entry point. Underneath it a `CachingClient`
//! consults the storage engine before handing requests to an
//! `HttpTransport`.

pub use self::client::{CacheStatus, CachingClient, ClientResponse};
pub use self::control::CacheControl;
pub use self::fetcher::ImageFetcher;
pub use self::policy::FetchPolicy;
pub use self::transport::{HttpTransport, ReqwestTransport, TransportError};

mod client;
mod control;
mod fetcher;
mod policy;
mod transport;
