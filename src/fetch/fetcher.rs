//! Image fetch façade
//!
//! `ImageFetcher` owns a `CachingClient` over the cache directory and turns
//! "fetch these bytes, trusting the network or not" into a single HTTP GET.

use super::client::{CacheStatus, CachingClient};
use super::policy::FetchPolicy;
use super::transport::{HttpTransport, ReqwestTransport};
use crate::config::Config;
use crate::constants::ACCEPTED_IMAGE_TYPES;
use crate::error::FetchError;
use crate::storage::CacheStorage;
use bytes::Bytes;
use http::{header, Request, Uri};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

static SHARED: OnceCell<ImageFetcher> = OnceCell::const_new();

#[derive(Clone)]
pub struct ImageFetcher {
    client: CachingClient,
    referer: String,
    user_agent: String,
    accept: String,
}

impl ImageFetcher {
    /// Opens the cache directory and builds the production transport
    pub async fn open(config: &Config) -> Result<Self, FetchError> {
        config.validate().map_err(FetchError::Config)?;

        let transport = ReqwestTransport::new(config.http.timeout())
            .map_err(|e| FetchError::Config(format!("failed to build HTTP client: {}", e)))?;
        let storage =
            CacheStorage::open_with_delay(&config.cache.dir, config.cache.save_delay()).await?;

        info!(
            cache_dir = %config.cache.dir.display(),
            entries = storage.len(),
            "Image cache opened"
        );

        Ok(Self::with_transport(config, storage, Arc::new(transport)))
    }

    pub fn with_transport(
        config: &Config,
        storage: CacheStorage,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            client: CachingClient::new(storage, transport, config.cache.max_object_size_bytes),
            referer: config.http.referer.clone(),
            user_agent: config.http.user_agent.clone(),
            accept: ACCEPTED_IMAGE_TYPES.join(", "),
        }
    }

    /// Process-wide instance, built from `config` on first use
    ///
    /// Concurrent first callers wait for a single construction; later calls
    /// ignore `config` and return the existing instance. A failed
    /// construction is not cached, so the next call tries again.
    pub async fn shared(config: &Config) -> Result<&'static ImageFetcher, FetchError> {
        SHARED.get_or_try_init(|| Self::open(config)).await
    }

    pub fn storage(&self) -> &CacheStorage {
        self.client.storage()
    }

    /// GET request carrying the fetcher's headers and the cache policy
    pub fn build_request(&self, uri: &str, trust_network: bool) -> Result<Request<()>, FetchError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|_| FetchError::InvalidUri(uri.to_string()))?;
        if parsed.scheme().is_none() || parsed.host().is_none() {
            return Err(FetchError::InvalidUri(uri.to_string()));
        }

        Request::get(parsed)
            .header(header::REFERER, self.referer.as_str())
            .header(header::USER_AGENT, self.user_agent.as_str())
            .header(header::ACCEPT, self.accept.as_str())
            .header(
                header::CACHE_CONTROL,
                FetchPolicy::from_trust_network(trust_network).cache_control(),
            )
            .body(())
            .map_err(|e| FetchError::Protocol(e.to_string()))
    }

    /// Fetches the body at `uri`
    ///
    /// With `trust_network` the origin is asked to revalidate any cached
    /// copy; without it only the cache is consulted, however stale, and a
    /// miss fails with a 504 `FetchError::Status`.
    pub async fn fetch(&self, uri: &str, trust_network: bool) -> Result<Bytes, FetchError> {
        let request = self.build_request(uri, trust_network)?;
        let method = request.method().clone();

        let result = match self.client.execute(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    method = %method,
                    target = %uri,
                    phase = e.phase(),
                    error = %e,
                    "Image fetch failed"
                );
                return Err(e.into());
            }
        };

        let status = result.response.status();
        if !status.is_success() {
            if result.cache_status != CacheStatus::Unavailable {
                warn!(method = %method, target = %uri, status = status.as_u16(), "Image fetch returned error status");
            }
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(
            target = %uri,
            cache = ?result.cache_status,
            size = result.response.body().len(),
            "Image fetched"
        );
        Ok(result.response.into_body())
    }

    /// Deletes superseded body files no longer in use; returns how many
    pub async fn cleanup(&self) -> usize {
        let reclaimed = self.storage().reclaim().await;
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed superseded cache files");
        }
        reclaimed
    }

    /// Writes any unsaved index changes before the process exits
    pub async fn shutdown(&self) {
        if self.storage().flush().await {
            debug!("Cache index flushed on shutdown");
        }
    }
}

impl std::fmt::Debug for ImageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFetcher")
            .field("storage", self.storage())
            .field("referer", &self.referer)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
