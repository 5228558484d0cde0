//! Caching HTTP client
//!
//! Wraps an `HttpTransport` with just enough HTTP caching to drive the
//! storage engine:
//! - a usable stored response (fresh, or stale within the request's
//!   `max-stale`) is served without touching the network
//! - `only-if-cached` requests with nothing usable get a synthetic 504
//! - stale entries are revalidated with `If-None-Match`/`If-Modified-Since`;
//!   a 304 refreshes the stored headers but keeps the same body file
//! - storable origin responses are written through to the storage engine
//!
//! At most one request is sent to the transport per call.

use super::control::CacheControl;
use super::transport::{HttpTransport, TransportError};
use crate::storage::{parse_http_date, CacheEntry, CacheStorage, EntryDraft, Header, StatusLine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Statuses cached when the response allows it (RFC 9110 §15.1 heuristically cacheable subset)
const STORABLE_STATUSES: [u16; 5] = [200, 203, 300, 301, 410];

/// Header fields a 304 must not overwrite in the stored response
const NOT_UPDATED_BY_304: [&str; 3] = ["content-length", "content-encoding", "transfer-encoding"];

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from cache without contacting the origin
    Hit,
    /// The origin confirmed the cached copy (304)
    Validated,
    /// The response came from the origin
    Miss,
    /// Cache-only request with nothing usable cached (synthetic 504)
    Unavailable,
}

#[derive(Debug)]
pub struct ClientResponse {
    pub response: Response<Bytes>,
    pub cache_status: CacheStatus,
}

/// HTTP client backed by a `CacheStorage`
#[derive(Clone)]
pub struct CachingClient {
    storage: CacheStorage,
    transport: Arc<dyn HttpTransport>,
    max_object_size: u64,
}

impl CachingClient {
    pub fn new(
        storage: CacheStorage,
        transport: Arc<dyn HttpTransport>,
        max_object_size: u64,
    ) -> Self {
        Self {
            storage,
            transport,
            max_object_size,
        }
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub async fn execute(&self, request: Request<()>) -> Result<ClientResponse, TransportError> {
        let key = request.uri().to_string();
        let request_cc = CacheControl::parse_all(header_strs(request.headers(), header::CACHE_CONTROL));

        let mut cached = self
            .storage
            .get(&key)
            .filter(|entry| variant_matches(entry, request.headers()));

        if cached
            .as_ref()
            .map_or(false, |entry| is_usable(entry, &request_cc, Utc::now()))
        {
            if let Some(entry) = cached.take() {
                match entry.resource.read().await {
                    Ok(body) => {
                        debug!(url = %key, "Serving response from cache");
                        return Ok(ClientResponse {
                            response: build_response(&entry.status_line, &entry.headers, body)?,
                            cache_status: CacheStatus::Hit,
                        });
                    }
                    Err(e) => self.drop_unreadable(&key, &entry, &e).await,
                }
            }
        }

        if request_cc.only_if_cached {
            debug!(url = %key, "No usable cached response for cache-only request");
            return Ok(ClientResponse {
                response: gateway_timeout()?,
                cache_status: CacheStatus::Unavailable,
            });
        }

        let outgoing = conditional_request(&request, cached.as_ref());
        let request_date = Utc::now();
        let response = self.transport.execute(outgoing).await?;
        let response_date = Utc::now();

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                return self
                    .revalidated(&key, entry, response.headers(), request_date, response_date)
                    .await;
            }
        }

        self.store(&key, &request, &response, request_date, response_date)
            .await;
        Ok(ClientResponse {
            response,
            cache_status: CacheStatus::Miss,
        })
    }

    async fn revalidated(
        &self,
        key: &str,
        entry: CacheEntry,
        not_modified: &HeaderMap,
        request_date: DateTime<Utc>,
        response_date: DateTime<Utc>,
    ) -> Result<ClientResponse, TransportError> {
        let headers = merge_headers(&entry.headers, not_modified);

        let refreshed = headers.clone();
        let result = self
            .storage
            .update(key, |current| match current {
                // A newer response was stored meanwhile; keep it as it is.
                Some(current) if !current.shares_resource_with(&entry) => current.to_draft(),
                _ => entry
                    .to_draft()
                    .with_headers(refreshed)
                    .with_dates(request_date, response_date),
            })
            .await;
        if let Err(e) = result {
            warn!(url = %key, error = %e, "Failed to refresh cached entry after revalidation");
        }

        // `entry` keeps the body file alive even if it was replaced meanwhile.
        let body = match entry.resource.read().await {
            Ok(body) => body,
            Err(e) => {
                self.drop_unreadable(key, &entry, &e).await;
                return Err(TransportError::Read(format!(
                    "cached body for {} is unreadable: {}",
                    key, e
                )));
            }
        };

        debug!(url = %key, "Cached response revalidated");
        Ok(ClientResponse {
            response: build_response(&entry.status_line, &headers, body)?,
            cache_status: CacheStatus::Validated,
        })
    }

    async fn store(
        &self,
        key: &str,
        request: &Request<()>,
        response: &Response<Bytes>,
        request_date: DateTime<Utc>,
        response_date: DateTime<Utc>,
    ) {
        if !STORABLE_STATUSES.contains(&response.status().as_u16()) {
            return;
        }
        let response_cc =
            CacheControl::parse_all(header_strs(response.headers(), header::CACHE_CONTROL));
        if !response_cc.is_storable() {
            debug!(url = %key, "Response forbids storage");
            return;
        }
        let Some(variant_map) = variant_map_for(response.headers(), request.headers()) else {
            debug!(url = %key, "Response varies on everything, not caching");
            return;
        };
        let size = response.body().len() as u64;
        if size > self.max_object_size {
            debug!(url = %key, size, limit = self.max_object_size, "Response too large to cache");
            return;
        }

        let mut draft = EntryDraft::new(
            StatusLine::new(response.version(), response.status()),
            response.body().clone(),
        )
        .with_dates(request_date, response_date)
        .with_headers(headers_from_map(response.headers()));
        draft.variant_map = variant_map;

        match self.storage.put(key, draft).await {
            Ok(()) => debug!(url = %key, size, "Cached response"),
            Err(e) => warn!(url = %key, error = %e, "Failed to cache response"),
        }
    }

    async fn drop_unreadable(&self, key: &str, entry: &CacheEntry, err: &std::io::Error) {
        warn!(
            url = %key,
            path = %entry.body_path().display(),
            error = %err,
            "Cached body is unreadable, dropping entry"
        );
        self.storage
            .remove_if(key, |current| current.shares_resource_with(entry))
            .await;
    }
}

fn header_strs(headers: &HeaderMap, name: HeaderName) -> impl Iterator<Item = &str> {
    headers
        .get_all(name)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
}

/// All values of a request header joined with ", " (empty when absent)
fn joined_header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .into_iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn headers_from_map(headers: &HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| Header::new(name.as_str(), String::from_utf8_lossy(value.as_bytes())))
        .collect()
}

fn variant_matches(entry: &CacheEntry, request_headers: &HeaderMap) -> bool {
    entry
        .variant_map
        .iter()
        .all(|(name, value)| joined_header(request_headers, name) == *value)
}

/// Selecting request header values for each `Vary` field; `None` for `Vary: *`
fn variant_map_for(
    response_headers: &HeaderMap,
    request_headers: &HeaderMap,
) -> Option<BTreeMap<String, String>> {
    let mut variants = BTreeMap::new();
    for value in response_headers.get_all(header::VARY) {
        for field in String::from_utf8_lossy(value.as_bytes()).split(',') {
            let field = field.trim().to_ascii_lowercase();
            if field == "*" {
                return None;
            }
            if field.is_empty() {
                continue;
            }
            let selected = joined_header(request_headers, &field);
            variants.insert(field, selected);
        }
    }
    Some(variants)
}

fn freshness_lifetime(entry: &CacheEntry, response_cc: &CacheControl) -> Duration {
    if response_cc.no_cache {
        return Duration::ZERO;
    }
    if let Some(max_age) = response_cc.max_age {
        return max_age;
    }
    let Some(expires) = entry.header("expires") else {
        return Duration::ZERO;
    };
    let date = entry
        .header("date")
        .and_then(|date| parse_http_date(date).ok())
        .unwrap_or(entry.response_date);
    match parse_http_date(expires) {
        Ok(expires) => (expires - date).to_std().unwrap_or(Duration::ZERO),
        // Invalid Expires (e.g. "0") means already expired
        Err(_) => Duration::ZERO,
    }
}

fn is_usable(entry: &CacheEntry, request_cc: &CacheControl, now: DateTime<Utc>) -> bool {
    let response_cc = CacheControl::parse_all(entry.header_values("cache-control"));
    let lifetime = freshness_lifetime(entry, &response_cc);
    let age = (now - entry.response_date)
        .to_std()
        .unwrap_or(Duration::ZERO);

    if request_cc.requires_revalidation() {
        // RFC 8246: an immutable response is not revalidated while fresh.
        return response_cc.immutable && age < lifetime;
    }
    age < lifetime.saturating_add(request_cc.stale_allowance(&response_cc))
}

fn conditional_request(request: &Request<()>, cached: Option<&CacheEntry>) -> Request<()> {
    let mut outgoing = Request::new(());
    *outgoing.method_mut() = request.method().clone();
    *outgoing.uri_mut() = request.uri().clone();
    *outgoing.headers_mut() = request.headers().clone();

    if let Some(entry) = cached {
        let validators = [
            (header::IF_NONE_MATCH, entry.header("etag")),
            (header::IF_MODIFIED_SINCE, entry.header("last-modified")),
        ];
        for (name, value) in validators {
            if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
                outgoing.headers_mut().insert(name, value);
            }
        }
    }
    outgoing
}

fn merge_headers(stored: &[Header], fresh: &HeaderMap) -> Vec<Header> {
    let updates: Vec<Header> = headers_from_map(fresh)
        .into_iter()
        .filter(|h| !NOT_UPDATED_BY_304.iter().any(|name| h.is(name)))
        .collect();
    let mut merged: Vec<Header> = stored
        .iter()
        .filter(|h| !updates.iter().any(|u| u.is(&h.name)))
        .cloned()
        .collect();
    merged.extend(updates);
    merged
}

fn build_response(
    status_line: &StatusLine,
    headers: &[Header],
    body: Bytes,
) -> Result<Response<Bytes>, TransportError> {
    let mut builder = Response::builder()
        .status(status_line.status)
        .version(status_line.version);
    for h in headers {
        builder = builder.header(h.name.as_str(), h.value.as_str());
    }
    builder
        .body(body)
        .map_err(|e| TransportError::Protocol(format!("stored response is not valid HTTP: {}", e)))
}

fn gateway_timeout() -> Result<Response<Bytes>, TransportError> {
    Response::builder()
        .status(StatusCode::GATEWAY_TIMEOUT)
        .body(Bytes::new())
        .map_err(|e| TransportError::Protocol(e.to_string()))
}
