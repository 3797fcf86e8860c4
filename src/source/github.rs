//! GitHub releases.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{ReleaseSource, get_success};
use crate::config::ApplicationSpec;
use crate::core::RelkeepError;
use crate::models::{Asset, DigestHint, Release};

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    size: Option<u64>,
    digest: Option<String>,
}

/// Releases from the GitHub REST API.
///
/// Uses `GITHUB_TOKEN` for authentication when it is set. Draft releases are
/// skipped.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubSource {
    /// A source talking to `api.github.com`.
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_base(client, API_BASE)
    }

    /// A source talking to another API endpoint, e.g. GitHub Enterprise.
    pub fn with_api_base(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// API URL listing the releases of the repository at `url`.
    pub fn releases_url(&self, url: &str) -> Result<String> {
        let (owner, repo) = parse_repository(url).ok_or_else(|| RelkeepError::Config {
            message: format!("'{url}' is not a GitHub repository URL (expected https://github.com/<owner>/<repo>)"),
        })?;
        Ok(format!("{}/repos/{owner}/{repo}/releases?per_page=50", self.api_base))
    }
}

#[async_trait]
impl ReleaseSource for GitHubSource {
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>> {
        let url = self.releases_url(&app.url)?;
        let mut request = self.client.get(&url).header("Accept", "application/vnd.github+json");
        if let Some(token) = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let body = get_success(request, &url)
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read response from {url}"))?;
        let releases = parse_releases(&body).with_context(|| format!("Unexpected response from {url}"))?;
        debug!("GitHub: {} release(s) for {}", releases.len(), app.name);
        Ok(releases)
    }
}

/// `(owner, repo)` of a `github.com` URL.
pub fn parse_repository(url: &str) -> Option<(String, String)> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let mut segments = without_scheme.split('/').filter(|s| !s.is_empty());
    let host = segments.next()?.to_ascii_lowercase();
    if host != "github.com" && host != "www.github.com" {
        return None;
    }
    let owner = segments.next()?;
    let repo = segments.next()?.trim_end_matches(".git");
    if repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn parse_releases(body: &str) -> Result<Vec<Release>> {
    let releases: Vec<GitHubRelease> = serde_json::from_str(body)?;
    Ok(releases
        .into_iter()
        .filter(|r| !r.draft)
        .map(|r| Release {
            tag: r.tag_name,
            published_at: r.published_at,
            prerelease: r.prerelease,
            assets: r
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    url: a.browser_download_url,
                    size: a.size,
                    digest: a.digest.as_deref().and_then(DigestHint::parse),
                })
                .collect(),
        })
        .collect())
}
