// Test harness: a scripted in-process transport and fetcher builders

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use imgcache::config::Config;
use imgcache::fetch::{HttpTransport, TransportError};
use imgcache::storage::CacheStorage;
use imgcache::ImageFetcher;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Minimal PNG signature followed by a marker so bodies differ per test
pub fn png(marker: &str) -> Bytes {
    let mut body = b"\x89PNG\r\n\x1a\n".to_vec();
    body.extend_from_slice(marker.as_bytes());
    Bytes::from(body)
}

pub fn ok(headers: &[(&str, &str)], body: Bytes) -> Response<Bytes> {
    response(200, headers, body)
}

pub fn response(status: u16, headers: &[(&str, &str)], body: Bytes) -> Response<Bytes> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

/// Transport answering from a queue of scripted results and recording every request
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<Response<Bytes>, TransportError>>>,
    seen: Mutex<Vec<Request<()>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, result: Result<Response<Bytes>, TransportError>) {
        self.script.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.seen
            .lock()
            .last()
            .and_then(|req| req.headers().get(name))
            .map(|v| v.to_str().unwrap().to_string())
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, request: Request<()>) -> Result<Response<Bytes>, TransportError> {
        let uri = request.uri().to_string();
        self.seen.lock().push(request);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request to {}", uri))
    }
}

/// Fetcher over `dir` with a short save delay, driven by `transport`
pub async fn fetcher(dir: &TempDir, transport: Arc<FakeTransport>) -> ImageFetcher {
    let config = Config::with_cache_dir(dir.path());
    let storage = CacheStorage::open_with_delay(dir.path(), Duration::from_millis(100))
        .await
        .unwrap();
    ImageFetcher::with_transport(&config, storage, transport)
}
