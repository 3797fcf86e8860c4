//! End-to-end update cycles: download, verify, install, rotate and roll back.

use relkeep::models::{Outcome, Warning};
use relkeep::test_utils::{StaticSource, TestServer, fixtures};
use tempfile::TempDir;

use crate::common::{appimage_app, engine_with, file_names, has_partial_files, publish, unverified_app};

fn appimage_release(server: &TestServer, tag: &str, name: &str) -> relkeep::models::Release {
    let content = format!("{name} payload").into_bytes();
    let base = publish(server, name, &content);
    fixtures::release(tag, &[name], &base)
}

#[tokio::test]
async fn test_fresh_install_verifies_and_records() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");

    let name = "App-1.0-x86_64.AppImage";
    let content = b"appimage v1".to_vec();
    let base = publish(&server, name, &content);
    server.serve(
        &format!("/dl/{name}.sha256"),
        format!("{}  {name}\n", fixtures::sha256_hex(&content)),
    );
    let release = fixtures::release("v1.0", &[name, &format!("{name}.sha256")], &base);
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));
    let app = appimage_app("App", &dir);

    let result = engine.check_application(&app).await;
    assert_eq!(result.outcome, Outcome::Updated, "{:?}", result.error);
    assert_eq!(result.old_version, None);
    assert_eq!(result.new_version.as_deref(), Some("v1.0"));
    assert!(result.warnings.is_empty());

    assert_eq!(file_names(&dir), vec!["App-1.0-x86_64.AppImage.current"]);
    let installed = dir.join("App-1.0-x86_64.AppImage.current");
    assert_eq!(std::fs::read(&installed).unwrap(), content);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let state = engine.installed_state(&app).await.unwrap();
    let record = state.record.unwrap();
    assert_eq!(record.version, "v1.0");
    assert_eq!(record.file_name, name);
    assert_eq!(record.digest, Some(fixtures::sha256_hex(&content)));
    assert_eq!(server.hits(&format!("/dl/{name}")), 1);
}

#[tokio::test]
async fn test_missing_digest_installs_with_warning() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let release = appimage_release(&server, "v1.0", "App-1.0.AppImage");
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));

    let result = engine.check_application(&appimage_app("App", temp.path())).await;
    assert_eq!(result.outcome, Outcome::Updated);
    assert!(matches!(
        result.warnings.as_slice(),
        [Warning::UnverifiedChecksum { asset, .. }] if asset == "App-1.0.AppImage"
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_successive_updates_rotate_and_evict() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");
    let link = temp.path().join("bin").join("app");

    let mut app = unverified_app("App", &dir);
    app.rotation.retain_count = 2;
    app.rotation.symlink_path = Some(link.clone());

    for (tag, name) in [("1.0", "App-1.0.AppImage"), ("1.1", "App-1.1.AppImage"), ("1.2", "App-1.2.AppImage")] {
        let release = appimage_release(&server, tag, name);
        let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));
        let result = engine.check_application(&app).await;
        assert_eq!(result.outcome, Outcome::Updated, "{tag}: {:?}", result.error);
        assert_eq!(result.new_version.as_deref(), Some(tag));
    }

    assert_eq!(file_names(&dir), vec!["App-1.1.AppImage.old", "App-1.2.AppImage.current"]);
    assert_eq!(std::fs::read_link(&link).unwrap(), dir.join("App-1.2.AppImage.current"));
    assert_eq!(std::fs::read(&link).unwrap(), b"App-1.2.AppImage payload");

    // the same release again is a no-op
    let release = appimage_release(&server, "1.2", "App-1.2.AppImage");
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));
    let result = engine.check_application(&app).await;
    assert_eq!(result.outcome, Outcome::UpToDate);
    assert_eq!(result.old_version.as_deref(), Some("1.2"));
    assert_eq!(server.hits("/dl/App-1.2.AppImage"), 1);

    let history = engine.installed_state(&app).await.unwrap().record.unwrap().history;
    let versions: Vec<&str> = history.iter().map(|h| h.version.as_str()).collect();
    assert_eq!(versions, vec!["1.1", "1.0"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_rollback_restores_previous_version() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");
    let link = temp.path().join("app-link");

    let mut app = unverified_app("App", &dir);
    app.rotation.symlink_path = Some(link.clone());

    let mut engine = None;
    for (tag, name) in [("1.0", "App-1.0.AppImage"), ("2.0", "App-2.0.AppImage")] {
        let release = appimage_release(&server, tag, name);
        let e = engine_with(StaticSource::new().with_releases("App", vec![release]));
        assert_eq!(e.check_application(&app).await.outcome, Outcome::Updated);
        engine = Some(e);
    }
    let engine = engine.unwrap();

    let rollback = engine.rollback(&app).await.unwrap();
    assert_eq!(rollback.restored, dir.join("App-1.0.AppImage.current"));
    assert_eq!(rollback.demoted, dir.join("App-2.0.AppImage.old"));
    assert_eq!(file_names(&dir), vec!["App-1.0.AppImage.current", "App-2.0.AppImage.old"]);
    assert_eq!(std::fs::read_link(&link).unwrap(), dir.join("App-1.0.AppImage.current"));

    let record = engine.installed_state(&app).await.unwrap().record.unwrap();
    assert_eq!(record.version, "1.0");
    assert_eq!(record.history[0].version, "2.0");
}

#[tokio::test]
async fn test_zip_release_installs_nested_artifact() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");

    let archive = fixtures::zip_bytes(&[
        ("App-2.0/README.md", b"readme".as_slice()),
        ("App-2.0/bin/App-2.0.AppImage", b"zipped appimage".as_slice()),
    ]);
    let base = publish(&server, "App-2.0-linux.zip", &archive);
    let release = fixtures::release("2.0", &["App-2.0-linux.zip", "App-2.0.deb"], &base);

    let mut app = unverified_app("App", &dir);
    app.pattern = None;
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));

    let result = engine.check_application(&app).await;
    assert_eq!(result.outcome, Outcome::Updated, "{:?}", result.error);
    assert_eq!(file_names(&dir), vec!["App-2.0.AppImage.current"]);
    assert_eq!(std::fs::read(dir.join("App-2.0.AppImage.current")).unwrap(), b"zipped appimage");

    let record = engine.installed_state(&app).await.unwrap().record.unwrap();
    assert_eq!(record.file_name, "App-2.0.AppImage");
    assert_eq!(record.digest, Some(fixtures::sha256_hex(b"zipped appimage")));
}

#[tokio::test]
async fn test_archive_without_artifact_fails_cleanly() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");

    let archive = fixtures::tar_gz_bytes(&[("docs/manual.pdf", b"pdf".as_slice()), ("LICENSE", b"mit".as_slice())]);
    let base = publish(&server, "App-3.0.tar.gz", &archive);
    let release = fixtures::release("3.0", &["App-3.0.tar.gz"], &base);

    let mut app = unverified_app("App", &dir);
    app.pattern = None;
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));

    let result = engine.check_application(&app).await;
    assert_eq!(result.outcome, Outcome::Failed);
    let error = result.error.unwrap();
    assert!(error.contains("No AppImage artifact found"), "{error}");
    assert!(error.contains("docs") && error.contains("LICENSE"), "{error}");
    assert!(file_names(&dir).is_empty(), "{:?}", file_names(&dir));
}

#[tokio::test]
async fn test_failure_leaves_installed_version_untouched() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("apps");
    let app = unverified_app("App", &dir);

    let release = appimage_release(&server, "1.0", "App-1.0.AppImage");
    let engine = engine_with(StaticSource::new().with_releases("App", vec![release]));
    assert_eq!(engine.check_application(&app).await.outcome, Outcome::Updated);

    // 2.0 is announced but its download is gone
    let gone = fixtures::release("2.0", &["App-2.0.AppImage"], &server.url("dl"));
    let engine = engine_with(StaticSource::new().with_releases("App", vec![gone]));
    let result = engine.check_application(&app).await;

    assert_eq!(result.outcome, Outcome::Failed);
    assert!(result.error.unwrap().contains("HTTP 404"));
    assert_eq!(file_names(&dir), vec!["App-1.0.AppImage.current"]);
    assert!(!has_partial_files(&dir));
    assert_eq!(server.hits("/dl/App-2.0.AppImage"), 1);

    let record = engine.installed_state(&app).await.unwrap().record.unwrap();
    assert_eq!(record.version, "1.0");
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();

    let good = appimage_release(&server, "1.0", "Good-1.0.AppImage");
    let source = StaticSource::new()
        .with_releases("Good", vec![good])
        .with_error("Broken", "feed unavailable")
        .with_releases("Empty", vec![fixtures::release("1.0", &["Empty-1.0.deb"], &server.url("dl"))]);
    let engine = engine_with(source);

    let apps = vec![
        unverified_app("Broken", &temp.path().join("broken")),
        unverified_app("Good", &temp.path().join("good")),
        unverified_app("Empty", &temp.path().join("empty")),
    ];
    let results = engine.check_all(&apps).await;

    let outcomes: Vec<(&str, Outcome)> = results.iter().map(|r| (r.app_name.as_str(), r.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![("Broken", Outcome::Failed), ("Good", Outcome::Updated), ("Empty", Outcome::NoEligibleRelease)]
    );
    assert!(results[0].error.as_deref().unwrap().contains("feed unavailable"));
    assert_eq!(file_names(&temp.path().join("good")), vec!["Good-1.0.AppImage.current"]);
}

/// Reads nothing and refuses every write.
struct ReadOnlyStore;

impl relkeep::engine::VersionStore for ReadOnlyStore {
    fn load(&self, _dir: &std::path::Path, _app: &str) -> anyhow::Result<Option<relkeep::engine::InstalledVersion>> {
        Ok(None)
    }

    fn save(
        &self,
        _dir: &std::path::Path,
        _app: &str,
        _record: &relkeep::engine::InstalledVersion,
    ) -> anyhow::Result<()> {
        anyhow::bail!("state file is read-only")
    }
}

#[tokio::test]
async fn test_unrecorded_install_is_a_warning() {
    use relkeep::engine::{NoProgress, UpdateEngine};
    use std::sync::Arc;

    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    let release = appimage_release(&server, "v3.0", "App-3.0.AppImage");
    let engine = UpdateEngine::new(crate::common::fast_engine_config(), Arc::new(ReadOnlyStore), Arc::new(NoProgress))
        .unwrap()
        .with_source(Arc::new(StaticSource::new().with_releases("App", vec![release])));

    let result = engine.check_application(&unverified_app("App", temp.path())).await;

    assert_eq!(result.outcome, Outcome::Updated, "{:?}", result.error);
    assert!(result.error.is_none());
    assert!(matches!(
        result.warnings.as_slice(),
        [Warning::VersionNotRecorded { version, reason }] if version == "v3.0" && reason.contains("read-only")
    ));
    assert_eq!(file_names(temp.path()), vec!["App-3.0.AppImage.current"]);
}
