//! Common test utilities for relkeep integration tests

// Not every helper is used by every test module
#![allow(dead_code)]

use relkeep::config::{ApplicationSpec, ChecksumPolicy, EngineConfig};
use relkeep::engine::{MetadataFileStore, NoProgress, UpdateEngine};
use relkeep::source::ReleaseSource;
use relkeep::test_utils::{TestServer, init_test_logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine settings that keep failing tests fast.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        max_concurrent_checks: 4,
        max_concurrent_downloads: 2,
        timeout_secs: 10,
        retries: 1,
        check_timeout_secs: 30,
    }
}

/// An engine using `source` for every application and persisting state on disk.
pub fn engine_with(source: impl ReleaseSource + 'static) -> UpdateEngine {
    init_test_logging(None);
    UpdateEngine::new(fast_engine_config(), Arc::new(MetadataFileStore), Arc::new(NoProgress))
        .expect("engine")
        .with_source(Arc::new(source))
}

/// An AppImage application named `name` installed into `dir`, with optional
/// checksums.
pub fn appimage_app(name: &str, dir: &Path) -> ApplicationSpec {
    let mut app = ApplicationSpec::new(name, format!("https://github.com/example/{name}"), dir);
    app.pattern = Some(format!(r"{name}.*\.AppImage$"));
    app
}

/// `appimage_app` with verification turned off.
pub fn unverified_app(name: &str, dir: &Path) -> ApplicationSpec {
    let mut app = appimage_app(name, dir);
    app.checksum = ChecksumPolicy::disabled();
    app
}

/// Serve `content` at `/dl/<name>` and return its URL base.
pub fn publish(server: &TestServer, name: &str, content: &[u8]) -> String {
    server.serve(&format!("/dl/{name}"), content.to_vec());
    server.url("dl")
}

/// Sorted file names in `dir`, ignoring relkeep's lock and state files.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n != ".relkeep.lock" && n != ".relkeep-state.json")
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Whether any temporary download file is left in `dir`.
pub fn has_partial_files(dir: &Path) -> bool {
    file_names(dir).iter().any(|n| n.ends_with(".part"))
}

/// `dir/name`
pub fn path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
