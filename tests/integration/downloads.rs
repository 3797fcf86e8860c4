//! Download manager behavior against a live HTTP server: retries, status
//! handling, checksum policy, concurrency, timeouts and cancellation.

use relkeep::config::{ChecksumAlgorithm, ChecksumPolicy};
use relkeep::core::RelkeepError;
use relkeep::engine::{DownloadManager, DownloadRequest, DownloadSettings, NoProgress};
use relkeep::models::{Asset, DownloadResult, DownloadStatus, Warning};
use relkeep::source::http_client;
use relkeep::test_utils::{MockResponse, RecordingProgress, TestServer, fixtures};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{file_names, has_partial_files};

fn settings(concurrency: usize, retries: u32) -> DownloadSettings {
    DownloadSettings {
        concurrency,
        timeout: Duration::from_secs(5),
        retries,
        backoff_base: Duration::from_millis(20),
    }
}

fn manager(settings: DownloadSettings) -> DownloadManager {
    DownloadManager::new(http_client().unwrap(), settings, Arc::new(NoProgress))
}

fn request(asset: Asset, dest: &Path, checksum: ChecksumPolicy) -> DownloadRequest {
    DownloadRequest {
        asset,
        siblings: Vec::new(),
        dest_dir: dest.to_path_buf(),
        checksum,
        cancel: CancellationToken::new(),
    }
}

fn relkeep_error(result: &DownloadResult) -> &RelkeepError {
    result
        .error
        .as_ref()
        .and_then(|e| e.downcast_ref::<RelkeepError>())
        .unwrap_or_else(|| panic!("expected a RelkeepError, got {:?}", result.error))
}

#[tokio::test]
async fn test_inline_digest_verified() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/App.AppImage", b"payload".to_vec());

    let asset = fixtures::with_inline_digest(fixtures::asset("App.AppImage", server.url("App.AppImage")), b"payload");
    let result = manager(settings(1, 0)).fetch_one(request(asset, temp.path(), ChecksumPolicy::default())).await;

    assert_eq!(result.status, DownloadStatus::Succeeded, "{:?}", result.error);
    assert_eq!(result.bytes, 7);
    assert_eq!(result.digest, Some(fixtures::sha256_hex(b"payload")));
    let path = result.path.unwrap();
    assert_eq!(path.parent(), Some(temp.path()));
    assert_eq!(std::fs::read(&path).unwrap(), b"payload");
}

#[tokio::test]
async fn test_checksum_mismatch_discards_file_without_retry() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/App.AppImage", b"tampered".to_vec());

    let asset = fixtures::with_inline_digest(fixtures::asset("App.AppImage", server.url("App.AppImage")), b"original");
    let result = manager(settings(1, 3)).fetch_one(request(asset, temp.path(), ChecksumPolicy::default())).await;

    assert_eq!(result.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&result), RelkeepError::ChecksumMismatch { .. }));
    assert_eq!(server.hits("/App.AppImage"), 1);
    assert!(file_names(temp.path()).is_empty(), "{:?}", file_names(temp.path()));
}

#[tokio::test]
async fn test_digest_file_from_sibling_asset() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/files/App.AppImage", b"payload".to_vec());
    server.serve(
        "/checksums/SHA1SUMS",
        format!("{}  App.AppImage\n", hex_sha1(b"payload")),
    );

    let mut req = request(
        fixtures::asset("App.AppImage", server.url("files/App.AppImage")),
        temp.path(),
        ChecksumPolicy {
            algorithm: ChecksumAlgorithm::Sha1,
            pattern: "SHA1SUMS".to_string(),
            required: true,
            ..ChecksumPolicy::default()
        },
    );
    req.siblings = vec![fixtures::asset("SHA1SUMS", server.url("checksums/SHA1SUMS"))];

    let result = manager(settings(1, 0)).fetch_one(req).await;
    assert_eq!(result.status, DownloadStatus::Succeeded, "{:?}", result.error);
    assert_eq!(server.hits("/checksums/SHA1SUMS"), 1);
}

fn hex_sha1(content: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    hex::encode(Sha1::digest(content))
}

#[tokio::test]
async fn test_unavailable_digest_follows_policy() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/App.AppImage", b"payload".to_vec());
    let downloads = manager(settings(1, 0));
    let asset = fixtures::asset("App.AppImage", server.url("App.AppImage"));

    let optional = downloads.fetch_one(request(asset.clone(), temp.path(), ChecksumPolicy::default())).await;
    assert_eq!(optional.status, DownloadStatus::Unverified);
    assert!(matches!(
        optional.warnings.as_slice(),
        [Warning::UnverifiedChecksum { reason, .. }] if reason.contains("HTTP 404")
    ));
    assert!(optional.path.unwrap().exists());

    let required = ChecksumPolicy {
        required: true,
        ..ChecksumPolicy::default()
    };
    let strict_dir = temp.path().join("strict");
    let strict = downloads.fetch_one(request(asset, &strict_dir, required)).await;
    assert_eq!(strict.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&strict), RelkeepError::ChecksumUnavailable { .. }));
    assert!(!has_partial_files(&strict_dir));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();

    let asset = fixtures::asset("Gone.AppImage", server.url("Gone.AppImage"));
    let result = manager(settings(1, 3)).fetch_one(request(asset, temp.path(), ChecksumPolicy::disabled())).await;

    assert_eq!(result.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&result), RelkeepError::HttpStatus { status: 404, .. }));
    assert_eq!(server.hits("/Gone.AppImage"), 1);
    assert!(file_names(temp.path()).is_empty());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.respond_sequence(
        "/Flaky.AppImage",
        vec![MockResponse::status(503), MockResponse::status(500), MockResponse::ok("finally")],
    );

    let progress = Arc::new(RecordingProgress::new());
    let downloads = DownloadManager::new(http_client().unwrap(), settings(1, 3), progress.clone());
    let asset = fixtures::asset("Flaky.AppImage", server.url("Flaky.AppImage"));
    let result = downloads.fetch_one(request(asset, temp.path(), ChecksumPolicy::disabled())).await;

    assert_eq!(result.status, DownloadStatus::Succeeded, "{:?}", result.error);
    assert_eq!(server.hits("/Flaky.AppImage"), 3);
    assert_eq!(std::fs::read(result.path.unwrap()).unwrap(), b"finally");
    assert_eq!(progress.attempts("Flaky.AppImage"), 1);
    assert_eq!(progress.outcome("Flaky.AppImage"), Some(true));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.respond("/Down.AppImage", MockResponse::status(502));

    let asset = fixtures::asset("Down.AppImage", server.url("Down.AppImage"));
    let result = manager(settings(1, 2)).fetch_one(request(asset, temp.path(), ChecksumPolicy::disabled())).await;

    assert_eq!(result.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&result), RelkeepError::HttpStatus { status: 502, .. }));
    assert_eq!(server.hits("/Down.AppImage"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_is_capped() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();

    let mut requests = Vec::new();
    for i in 0..6 {
        let name = format!("App{i}.AppImage");
        server.respond(&name, MockResponse::ok(format!("payload {i}")).with_delay(Duration::from_millis(150)));
        requests.push(request(fixtures::asset(&name, server.url(&name)), temp.path(), ChecksumPolicy::disabled()));
    }

    let results = manager(settings(2, 0)).fetch(requests).await;

    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.asset_name, format!("App{i}.AppImage"));
        assert!(result.is_success(), "{:?}", result.error);
    }
    assert!(server.max_in_flight() <= 2, "{} downloads in flight", server.max_in_flight());
}

#[tokio::test]
async fn test_attempt_timeout() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.respond("/Slow.AppImage", MockResponse::ok("late").with_delay(Duration::from_secs(5)));

    let downloads = manager(DownloadSettings {
        timeout: Duration::from_millis(200),
        ..settings(1, 1)
    });
    let start = Instant::now();
    let asset = fixtures::asset("Slow.AppImage", server.url("Slow.AppImage"));
    let result = downloads.fetch_one(request(asset, temp.path(), ChecksumPolicy::disabled())).await;

    assert_eq!(result.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&result), RelkeepError::Timeout { .. }));
    assert_eq!(server.hits("/Slow.AppImage"), 2);
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(!has_partial_files(temp.path()));
}

#[tokio::test]
async fn test_cancellation_aborts_transfer() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.respond("/Big.AppImage", MockResponse::ok("never").with_delay(Duration::from_secs(10)));

    let downloads = manager(settings(1, 3));
    let req = request(fixtures::asset("Big.AppImage", server.url("Big.AppImage")), temp.path(), ChecksumPolicy::disabled());
    let token = req.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let start = Instant::now();
    let result = downloads.fetch_one(req).await;

    assert_eq!(result.status, DownloadStatus::Failed);
    assert!(matches!(relkeep_error(&result), RelkeepError::Cancelled { .. }));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!has_partial_files(temp.path()));
}
