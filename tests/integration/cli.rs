//! The `relkeep` binary: flags, exit status and report formats.

use assert_cmd::Command;
use predicates::prelude::*;
use relkeep::test_utils::TestServer;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `relkeep` with a private home and the given config file.
fn relkeep(home: &Path, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("relkeep").unwrap();
    cmd.env("HOME", home)
        .env("RELKEEP_CONFIG", config)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .arg("--no-progress");
    cmd
}

/// Write a config tracking one direct download per `(name, url)`.
fn write_config(dir: &Path, apps: &[(&str, String)]) -> PathBuf {
    let mut toml = String::from("[engine]\nretries = 0\ntimeout_secs = 10\n");
    for (name, url) in apps {
        let download_dir = dir.join("apps").join(name);
        toml.push_str(&format!(
            "\n[[applications]]\nname = \"{name}\"\nsource_type = \"direct\"\nurl = \"{url}\"\ndownload_dir = '{}'\n\n[applications.checksum]\nenabled = false\n",
            download_dir.display()
        ));
    }
    let path = dir.join("config.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

/// Run `cmd` off the async runtime so the test server keeps serving.
async fn run(mut cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || cmd.assert()).await.unwrap()
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("relkeep")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    Command::cargo_bin("relkeep")
        .unwrap()
        .args(["--verbose", "--quiet", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_list_without_config() {
    let temp = TempDir::new().unwrap();
    relkeep(temp.path(), &temp.path().join("missing.toml"))
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No applications configured"));
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "[[applications]]\nname = \"A\"\n").unwrap();

    relkeep(temp.path(), &config)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TOML parsing error"));
}

#[test]
fn test_rollback_unknown_application() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), &[("Tool", "https://example.com/Tool.AppImage".to_string())]);

    relkeep(temp.path(), &config)
        .args(["rollback", "Other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Other"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_installs_and_lists() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/dl/Tool-1.4.0.AppImage", "tool 1.4.0");
    let config = write_config(temp.path(), &[("Tool", server.url("dl/Tool-1.4.0.AppImage"))]);

    let mut check = relkeep(temp.path(), &config);
    check.arg("check");
    run(check)
        .await
        .success()
        .stdout(predicate::str::contains("Tool").and(predicate::str::contains("updated")));

    let installed = temp.path().join("apps/Tool/Tool-1.4.0.AppImage.current");
    assert_eq!(std::fs::read(installed).unwrap(), b"tool 1.4.0");

    let mut list = relkeep(temp.path(), &config);
    list.args(["list", "--format", "json"]);
    let output = run(list).await.success().get_output().stdout.clone();
    let entries: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(entries[0]["name"], "Tool");
    assert_eq!(entries[0]["version"], "1.4.0");
    assert_eq!(entries[0]["current"], "Tool-1.4.0.AppImage.current");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_dry_run_downloads_nothing() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/dl/Tool-2.0.AppImage", "tool 2.0");
    let config = write_config(temp.path(), &[("Tool", server.url("dl/Tool-2.0.AppImage"))]);

    let mut check = relkeep(temp.path(), &config);
    check.args(["check", "--dry-run", "--format", "json"]);
    let output = run(check).await.success().get_output().stdout.clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["results"][0]["outcome"], "update-available");
    assert_eq!(report["summary"]["update_available"], 1);
    assert!(!temp.path().join("apps/Tool/Tool-2.0.AppImage.current").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_failure_sets_exit_status() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/dl/Good-1.0.AppImage", "good");
    let config = write_config(
        temp.path(),
        &[
            ("Good", server.url("dl/Good-1.0.AppImage")),
            ("Gone", server.url("dl/Gone-1.0.AppImage")),
        ],
    );

    let mut check = relkeep(temp.path(), &config);
    check.args(["check", "--format", "json"]);
    let assert = run(check).await.code(1);

    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["results"][0]["outcome"], "updated");
    assert_eq!(report["results"][1]["outcome"], "failed");
    assert!(report["results"][1]["error"].as_str().unwrap().contains("404"));
    assert_eq!(report["summary"]["failed"], 1);
}
