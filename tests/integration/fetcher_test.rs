// Fetch façade tests: policy headers, cache hits, revalidation and cleanup

use super::test_harness::{fetcher, ok, png, response, FakeTransport};
use imgcache::config::Config;
use imgcache::fetch::TransportError;
use imgcache::storage::CacheStorage;
use imgcache::{FetchError, ImageFetcher};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const URL: &str = "https://tiles.example/map/7/12.png";

#[tokio::test]
async fn test_online_request_carries_identity_and_policy_headers() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[], png("a"))));
    let fetcher = fetcher(&dir, transport.clone()).await;

    assert_ok!(fetcher.fetch(URL, true).await);

    assert_eq!(transport.last_header("cache-control").as_deref(), Some("no-cache"));
    assert_eq!(
        transport.last_header("accept").as_deref(),
        Some("image/png, image/jpeg, image/gif, image/webp, image/bmp")
    );
    assert!(transport.last_header("user-agent").unwrap().starts_with("imgcache/"));
    assert_eq!(
        transport.last_header("referer").as_deref(),
        Some("https://imgcache.invalid/")
    );
}

#[tokio::test]
async fn test_offline_fetch_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[("Cache-Control", "no-cache")], png("a"))));
    let fetcher = fetcher(&dir, transport.clone()).await;

    let online = assert_ok!(fetcher.fetch(URL, true).await);
    let offline = assert_ok!(fetcher.fetch(URL, false).await);

    assert_eq!(online, offline);
    assert_eq!(transport.calls(), 1, "offline fetch must not touch the network");
}

#[tokio::test]
async fn test_offline_miss_is_reported_as_cache_miss() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    let fetcher = fetcher(&dir, transport.clone()).await;

    let err = assert_err!(fetcher.fetch(URL, false).await);

    assert!(err.is_cache_miss(), "{err:?}");
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_not_modified_keeps_body_file() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[("ETag", "\"v1\"")], png("a"))));
    transport.respond(Ok(response(304, &[("ETag", "\"v1\"")], Default::default())));
    let fetcher = fetcher(&dir, transport.clone()).await;

    let first = assert_ok!(fetcher.fetch(URL, true).await);
    let path = fetcher.storage().get(URL).unwrap().body_path().to_path_buf();

    let second = assert_ok!(fetcher.fetch(URL, true).await);

    assert_eq!(transport.last_header("if-none-match").as_deref(), Some("\"v1\""));
    assert_eq!(first, second);
    assert_eq!(fetcher.storage().get(URL).unwrap().body_path(), path);
    assert_eq!(fetcher.cleanup().await, 0);
    assert!(path.exists());
}

#[tokio::test]
async fn test_changed_content_is_reclaimed_by_cleanup() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[("ETag", "\"v1\"")], png("a"))));
    transport.respond(Ok(ok(&[("ETag", "\"v2\"")], png("b"))));
    let fetcher = fetcher(&dir, transport.clone()).await;

    assert_ok!(fetcher.fetch(URL, true).await);
    let old_path = fetcher.storage().get(URL).unwrap().body_path().to_path_buf();

    let updated = assert_ok!(fetcher.fetch(URL, true).await);
    assert_eq!(updated, png("b"));

    assert_eq!(fetcher.cleanup().await, 1);
    assert!(!old_path.exists());
    assert!(fetcher.storage().get(URL).unwrap().body_path().exists());
    assert_eq!(fetcher.cleanup().await, 0);
}

#[tokio::test]
async fn test_connection_error_surfaces_and_caches_nothing() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Err(TransportError::Connection("connection refused".to_string())));
    let fetcher = fetcher(&dir, transport.clone()).await;

    let err = assert_err!(fetcher.fetch(URL, true).await);

    assert!(matches!(err, FetchError::Connection(_)), "{err:?}");
    assert!(fetcher.storage().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[], png("this body is larger than the cap"))));

    let mut config = Config::with_cache_dir(dir.path());
    config.cache.max_object_size_bytes = 16;
    let storage = CacheStorage::open(dir.path()).await.unwrap();
    let fetcher = ImageFetcher::with_transport(&config, storage, transport.clone());

    let body = assert_ok!(fetcher.fetch(URL, true).await);
    assert_eq!(body, png("this body is larger than the cap"));

    let err = assert_err!(fetcher.fetch(URL, false).await);
    assert!(err.is_cache_miss());
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[("Content-Type", "image/png")], png("persisted"))));
    let fetcher = fetcher(&dir, transport).await;
    assert_ok!(fetcher.fetch(URL, true).await);
    fetcher.shutdown().await;
    drop(fetcher);

    let offline_only = FakeTransport::new();
    let reopened = super::test_harness::fetcher(&dir, offline_only.clone()).await;

    let body = assert_ok!(reopened.fetch(URL, false).await);
    assert_eq!(body, png("persisted"));
    assert_eq!(offline_only.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_fetches_of_distinct_urls() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    for i in 0..8 {
        transport.respond(Ok(ok(&[], png(&format!("tile-{i}")))));
    }
    let fetcher = Arc::new(fetcher(&dir, transport.clone()).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let fetcher = fetcher.clone();
        handles.push(tokio::spawn(async move {
            fetcher
                .fetch(&format!("https://tiles.example/{i}.png"), true)
                .await
        }));
    }
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(transport.calls(), 8);
    assert_eq!(fetcher.storage().len(), 8);
}
