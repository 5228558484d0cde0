// On-disk layout tests: what a fetch leaves behind in the cache directory

use super::test_harness::{fetcher, ok, png, response, FakeTransport};
use imgcache::config::Config;
use imgcache::constants::INDEX_FILE_NAME;
use imgcache::storage::{body_file_name, CacheStorage};
use imgcache::ImageFetcher;
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

const URL: &str = "https://tiles.example/map/3/4.png";

fn read_index(dir: &TempDir) -> Value {
    let raw = std::fs::read(dir.path().join(INDEX_FILE_NAME)).unwrap();
    serde_json::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn test_index_records_response_metadata() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(
        &[("ETag", "\"v1\""), ("Content-Type", "image/png")],
        png("index"),
    )));
    let fetcher = fetcher(&dir, transport).await;

    assert_ok!(fetcher.fetch(URL, true).await);
    fetcher.shutdown().await;

    let index = read_index(&dir);
    let record = &index[URL];
    assert_eq!(record["status_line"], "HTTP/1.1 200 OK");

    let headers: Vec<&str> = record["headers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h.as_str().unwrap())
        .collect();
    assert!(headers.contains(&"etag: \"v1\""), "{headers:?}");
    assert!(headers.contains(&"content-type: image/png"), "{headers:?}");

    assert!(record["response_date"].as_str().unwrap().ends_with(" GMT"));

    let resource = record["resource"].as_str().unwrap();
    assert!(resource.ends_with(&body_file_name(&png("index"))), "{resource}");
    assert!(dir.path().join(body_file_name(&png("index"))).exists());
}

#[tokio::test]
async fn test_vary_selection_is_persisted() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(&[("Vary", "Accept")], png("vary"))));
    let fetcher = fetcher(&dir, transport).await;

    assert_ok!(fetcher.fetch(URL, true).await);
    fetcher.shutdown().await;

    let index = read_index(&dir);
    assert_eq!(
        index[URL]["variant_map"]["accept"],
        "image/png, image/jpeg, image/gif, image/webp, image/bmp"
    );
}

#[tokio::test]
async fn test_revalidated_headers_reach_the_index() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.respond(Ok(ok(
        &[("ETag", "\"v1\""), ("Cache-Control", "max-age=10")],
        png("reval"),
    )));
    transport.respond(Ok(response(
        304,
        &[("Cache-Control", "max-age=600")],
        Default::default(),
    )));
    let fetcher = fetcher(&dir, transport).await;

    assert_ok!(fetcher.fetch(URL, true).await);
    assert_ok!(fetcher.fetch(URL, true).await);
    fetcher.shutdown().await;

    let index = read_index(&dir);
    let headers = index[URL]["headers"].as_array().unwrap();
    assert!(headers.iter().any(|h| h == "cache-control: max-age=600"));
    assert!(!headers.iter().any(|h| h == "cache-control: max-age=10"));
    assert!(headers.iter().any(|h| h == "etag: \"v1\""));
}

#[tokio::test]
async fn test_burst_of_fetches_is_written_once() {
    let dir = TempDir::new().unwrap();
    let transport = FakeTransport::new();
    for i in 0..5 {
        transport.respond(Ok(ok(&[], png(&format!("burst-{i}")))));
    }
    let storage = CacheStorage::open_with_delay(dir.path(), Duration::from_millis(400))
        .await
        .unwrap();
    let fetcher =
        ImageFetcher::with_transport(&Config::with_cache_dir(dir.path()), storage, transport);

    for i in 0..5 {
        assert_ok!(
            fetcher
                .fetch(&format!("https://tiles.example/b/{i}.png"), true)
                .await
        );
    }
    assert_eq!(fetcher.storage().stats().pending_changes, 5);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let stats = fetcher.storage().stats();
    assert_eq!(stats.saves, 1);
    assert!(!stats.is_dirty());
    assert_eq!(read_index(&dir).as_object().unwrap().len(), 5);
}
