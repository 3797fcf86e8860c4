//! GitLab releases (v4 API).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{ReleaseSource, get_success};
use crate::config::ApplicationSpec;
use crate::core::RelkeepError;
use crate::models::{Asset, Release};

#[derive(Debug, Deserialize)]
struct GitLabRelease {
    tag_name: String,
    released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default)]
    assets: GitLabAssets,
}

#[derive(Debug, Default, Deserialize)]
struct GitLabAssets {
    #[serde(default)]
    links: Vec<GitLabLink>,
}

#[derive(Debug, Deserialize)]
struct GitLabLink {
    name: String,
    url: String,
    direct_asset_url: Option<String>,
}

/// Releases from a GitLab instance.
///
/// The API endpoint is derived from the project URL, so self-hosted
/// instances work without extra configuration. Uses `GITLAB_TOKEN` when set.
/// Upcoming releases are reported as prereleases.
#[derive(Debug, Clone)]
pub struct GitLabSource {
    client: reqwest::Client,
}

impl GitLabSource {
    /// A source using `client`.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }
}

#[async_trait]
impl ReleaseSource for GitLabSource {
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>> {
        let url = releases_url(&app.url).ok_or_else(|| RelkeepError::Config {
            message: format!(
                "'{}' is not a GitLab project URL (expected https://<host>/<group>/<project>)",
                app.url
            ),
        })?;

        let mut request = self.client.get(&url);
        if let Some(token) = std::env::var("GITLAB_TOKEN").ok().filter(|t| !t.is_empty()) {
            request = request.header("PRIVATE-TOKEN", token);
        }

        let body = get_success(request, &url)
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read response from {url}"))?;
        let releases = parse_releases(&body).with_context(|| format!("Unexpected response from {url}"))?;
        debug!("GitLab: {} release(s) for {}", releases.len(), app.name);
        Ok(releases)
    }
}

/// `<scheme>://<host>/api/v4/projects/<encoded path>/releases` for a project URL.
pub fn releases_url(project_url: &str) -> Option<String> {
    let (scheme, rest) = project_url.split_once("://")?;
    let (host, path) = rest.split_once('/')?;
    let path = path.split(['?', '#']).next().unwrap_or(path);
    // links into the web UI carry a "/-/" separator after the project path
    let path = path.split("/-/").next().unwrap_or(path).trim_matches('/').trim_end_matches(".git");
    if host.is_empty() || !path.contains('/') {
        return None;
    }
    Some(format!("{scheme}://{host}/api/v4/projects/{}/releases", path.replace('/', "%2F")))
}

fn parse_releases(body: &str) -> Result<Vec<Release>> {
    let releases: Vec<GitLabRelease> = serde_json::from_str(body)?;
    Ok(releases
        .into_iter()
        .map(|r| Release {
            tag: r.tag_name,
            published_at: r.released_at,
            prerelease: r.upcoming_release,
            assets: r
                .assets
                .links
                .into_iter()
                .map(|link| Asset {
                    name: link.name,
                    url: link.direct_asset_url.unwrap_or(link.url),
                    size: None,
                    digest: None,
                })
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_url() {
        assert_eq!(
            releases_url("https://gitlab.com/group/sub/project").as_deref(),
            Some("https://gitlab.com/api/v4/projects/group%2Fsub%2Fproject/releases")
        );
        assert_eq!(
            releases_url("https://git.example.org/team/app/-/releases").as_deref(),
            Some("https://git.example.org/api/v4/projects/team%2Fapp/releases")
        );
        assert_eq!(releases_url("https://gitlab.com/lonely"), None);
        assert_eq!(releases_url("gitlab.com/group/project"), None);
    }

    #[test]
    fn test_parse_releases() {
        let body = r#"[
            {
                "tag_name": "v3.0",
                "released_at": "2024-03-01T12:00:00Z",
                "upcoming_release": true,
                "assets": { "links": [] }
            },
            {
                "tag_name": "v2.0",
                "released_at": "2024-02-01T12:00:00Z",
                "upcoming_release": false,
                "assets": {
                    "count": 1,
                    "sources": [{ "format": "zip", "url": "https://gitlab.com/x.zip" }],
                    "links": [
                        {
                            "name": "App-2.0.AppImage",
                            "url": "https://gitlab.com/uploads/App-2.0.AppImage",
                            "direct_asset_url": "https://gitlab.com/group/app/-/releases/v2.0/downloads/App-2.0.AppImage"
                        },
                        { "name": "notes.txt", "url": "https://gitlab.com/uploads/notes.txt" }
                    ]
                }
            }
        ]"#;

        let releases = parse_releases(body).unwrap();
        assert_eq!(releases.len(), 2);
        assert!(releases[0].prerelease);

        let stable = &releases[1];
        assert_eq!(stable.tag, "v2.0");
        assert_eq!(stable.assets.len(), 2);
        assert!(stable.assets[0].url.ends_with("/downloads/App-2.0.AppImage"));
        assert_eq!(stable.assets[1].url, "https://gitlab.com/uploads/notes.txt");
    }
}
