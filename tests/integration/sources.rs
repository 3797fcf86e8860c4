//! Release sources against a local HTTP server, and full checks driven by them.

use relkeep::config::{ChecksumPolicy, SourceKind};
use relkeep::core::RelkeepError;
use relkeep::engine::{MetadataFileStore, NoProgress, UpdateEngine};
use relkeep::models::{DigestHint, Outcome};
use relkeep::source::{DirectSource, DynamicSource, GitHubSource, GitLabSource, ReleaseSource, http_client};
use relkeep::test_utils::{MockResponse, TestServer, fixtures};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{appimage_app, fast_engine_config, file_names, unverified_app};

fn github_releases(base: &str) -> String {
    serde_json::json!([
        {
            "tag_name": "v2.0.0",
            "draft": true,
            "prerelease": false,
            "published_at": null,
            "assets": []
        },
        {
            "tag_name": "v1.1.0",
            "draft": false,
            "prerelease": false,
            "published_at": "2024-06-01T12:00:00Z",
            "assets": [
                {
                    "name": "App-1.1.0-x86_64.AppImage",
                    "browser_download_url": format!("{base}/dl/App-1.1.0-x86_64.AppImage"),
                    "size": 19,
                    "digest": format!("sha256:{}", fixtures::sha256_hex(b"github appimage 1.1"))
                },
                {
                    "name": "App-1.1.0.tar.gz",
                    "browser_download_url": format!("{base}/dl/App-1.1.0.tar.gz"),
                    "size": null,
                    "digest": null
                }
            ]
        },
        {
            "tag_name": "v1.0.0",
            "draft": false,
            "prerelease": false,
            "published_at": "2024-05-01T12:00:00Z",
            "assets": []
        }
    ])
    .to_string()
}

#[tokio::test]
async fn test_github_source_reads_release_feed() {
    let server = TestServer::start().await.unwrap();
    server.serve("/repos/example/App/releases", github_releases(server.base_url()));

    let source = GitHubSource::with_api_base(http_client().unwrap(), server.base_url());
    let app = appimage_app("App", std::path::Path::new("/unused"));
    let releases = source.fetch_releases(&app).await.unwrap();

    let tags: Vec<&str> = releases.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["v1.1.0", "v1.0.0"]);
    let asset = &releases[0].assets[0];
    assert_eq!(asset.url, server.url("dl/App-1.1.0-x86_64.AppImage"));
    assert!(matches!(asset.digest, Some(DigestHint::Inline { .. })));
    assert_eq!(server.hits("/repos/example/App/releases"), 1);
}

#[tokio::test]
async fn test_github_source_reports_api_errors() {
    let server = TestServer::start().await.unwrap();
    server.respond("/repos/example/App/releases", MockResponse::status(403));

    let source = GitHubSource::with_api_base(http_client().unwrap(), server.base_url());
    let error = source.fetch_releases(&appimage_app("App", std::path::Path::new("/unused"))).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<RelkeepError>(),
        Some(RelkeepError::HttpStatus { status: 403, .. })
    ));

    server.serve("/repos/example/App/releases", r#"{"message": "Not Found"}"#);
    let error = source.fetch_releases(&appimage_app("App", std::path::Path::new("/unused"))).await.unwrap_err();
    assert!(format!("{error:#}").contains("Unexpected response"), "{error:#}");
}

#[tokio::test]
async fn test_github_update_uses_published_digest() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/repos/example/App/releases", github_releases(server.base_url()));
    server.serve("/dl/App-1.1.0-x86_64.AppImage", b"github appimage 1.1".to_vec());

    let source = GitHubSource::with_api_base(http_client().unwrap(), server.base_url());
    let engine = UpdateEngine::new(fast_engine_config(), Arc::new(MetadataFileStore), Arc::new(NoProgress))
        .unwrap()
        .with_source(Arc::new(source));
    let mut app = appimage_app("App", temp.path());
    app.checksum.required = true;

    let result = engine.check_application(&app).await;
    assert_eq!(result.outcome, Outcome::Updated, "{:?}", result.error);
    assert_eq!(result.new_version.as_deref(), Some("v1.1.0"));
    assert!(result.warnings.is_empty());
    assert_eq!(file_names(temp.path()), vec!["App-1.1.0-x86_64.AppImage.current"]);
    // the inline digest made a digest file lookup unnecessary
    assert_eq!(server.hits("/dl/App-1.1.0-x86_64.AppImage.sha256"), 0);
}

#[tokio::test]
async fn test_gitlab_source_uses_project_api() {
    let server = TestServer::start().await.unwrap();
    let body = serde_json::json!([
        {
            "tag_name": "v3.2",
            "released_at": "2024-07-01T08:00:00Z",
            "upcoming_release": false,
            "assets": {
                "links": [
                    {
                        "name": "App-3.2.AppImage",
                        "url": format!("{}/uploads/App-3.2.AppImage", server.base_url()),
                        "direct_asset_url": format!("{}/direct/App-3.2.AppImage", server.base_url())
                    }
                ]
            }
        }
    ]);
    server.serve("/api/v4/projects/group%2FApp/releases", body.to_string());

    let mut app = appimage_app("App", std::path::Path::new("/unused"));
    app.url = server.url("group/App");
    let releases = GitLabSource::new(http_client().unwrap()).fetch_releases(&app).await.unwrap();

    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag, "v3.2");
    assert_eq!(releases[0].assets[0].url, server.url("direct/App-3.2.AppImage"));
}

#[tokio::test]
async fn test_direct_source_describes_single_file() {
    let server = TestServer::start().await.unwrap();
    server.respond(
        "/nightly/App.AppImage",
        MockResponse::ok("nightly").with_header("Last-Modified", "Sat, 01 Jun 2024 09:30:00 GMT"),
    );
    server.serve("/stable/App-4.1.2-x86_64.AppImage", "stable");

    let source = DirectSource::new(http_client().unwrap());
    let mut app = appimage_app("App", std::path::Path::new("/unused"));

    app.url = server.url("nightly/App.AppImage");
    let nightly = source.fetch_releases(&app).await.unwrap();
    assert_eq!(nightly.len(), 1);
    assert_eq!(nightly[0].tag, "2024.06.01.093000");
    assert_eq!(nightly[0].assets[0].name, "App.AppImage");
    assert_eq!(nightly[0].assets[0].url, app.url);

    app.url = server.url("stable/App-4.1.2-x86_64.AppImage");
    let stable = source.fetch_releases(&app).await.unwrap();
    assert_eq!(stable[0].tag, "4.1.2");

    app.url = server.url("gone/App.AppImage");
    let error = source.fetch_releases(&app).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<RelkeepError>(),
        Some(RelkeepError::HttpStatus { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_dynamic_source_harvests_download_page() {
    let server = TestServer::start().await.unwrap();
    let page = r#"
        <ul>
          <li><a href="files/App-1.9.0-x86_64.AppImage">1.9.0</a></li>
          <li><a href="files/App-1.10.0-x86_64.AppImage">1.10.0</a></li>
          <li><a href="files/App-1.10.0.dmg">macOS</a></li>
        </ul>
    "#;
    server.serve("/downloads/", page);

    let mut app = appimage_app("App", std::path::Path::new("/unused"));
    app.url = server.url("downloads/");
    let releases = DynamicSource::new(http_client().unwrap()).fetch_releases(&app).await.unwrap();

    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag, "1.10.0");
    let names: Vec<&str> = releases[0].assets.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["App-1.10.0-x86_64.AppImage", "App-1.10.0.dmg"]);
    assert_eq!(releases[0].assets[0].url, server.url("downloads/files/App-1.10.0-x86_64.AppImage"));
}

#[tokio::test]
async fn test_engine_selects_source_from_configuration() {
    let server = TestServer::start().await.unwrap();
    let temp = TempDir::new().unwrap();
    server.serve("/downloads/", r#"<a href="App-2.1.AppImage">latest</a>"#);
    server.serve("/downloads/App-2.1.AppImage", "dynamic payload");

    let mut app = unverified_app("App", temp.path());
    app.url = server.url("downloads/");
    app.source_type = Some(SourceKind::Dynamic);
    app.checksum = ChecksumPolicy::disabled();

    let engine = UpdateEngine::new(fast_engine_config(), Arc::new(MetadataFileStore), Arc::new(NoProgress)).unwrap();
    let result = engine.check_application(&app).await;

    assert_eq!(result.outcome, Outcome::Updated, "{:?}", result.error);
    assert_eq!(result.new_version.as_deref(), Some("2.1"));
    assert_eq!(std::fs::read(temp.path().join("App-2.1.AppImage.current")).unwrap(), b"dynamic payload");
}
