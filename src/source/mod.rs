//! Release sources.
//!
//! A source turns an application's URL into a normalized list of
//! [`Release`]s. The engine only sees the [`ReleaseSource`] trait; the
//! concrete implementation is chosen by [`create_source`] from the configured
//! or detected [`SourceKind`].
//!
//! | Kind      | URL                                   | Implementation     |
//! |-----------|---------------------------------------|--------------------|
//! | `github`  | `https://github.com/<owner>/<repo>`   | [`GitHubSource`]   |
//! | `gitlab`  | `https://gitlab.com/<group>/<project>`| [`GitLabSource`]   |
//! | `direct`  | URL of the artifact itself            | [`DirectSource`]   |
//! | `dynamic` | HTML page linking to artifacts        | [`DynamicSource`]  |
//!
//! Sources never cache between check cycles.

mod direct;
mod dynamic;
mod github;
mod gitlab;

pub use direct::DirectSource;
pub use dynamic::DynamicSource;
pub use github::GitHubSource;
pub use gitlab::GitLabSource;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{ApplicationSpec, SourceKind};
use crate::constants::USER_AGENT;
use crate::core::RelkeepError;
use crate::models::Release;

/// Fetches the releases of one application.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// All releases currently published for `app`, in any order.
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>>;
}

/// The source implementation for `kind`.
pub fn create_source(kind: SourceKind, client: reqwest::Client) -> Arc<dyn ReleaseSource> {
    match kind {
        SourceKind::Github => Arc::new(GitHubSource::new(client)),
        SourceKind::Gitlab => Arc::new(GitLabSource::new(client)),
        SourceKind::Direct => Arc::new(DirectSource::new(client)),
        SourceKind::Dynamic => Arc::new(DynamicSource::new(client)),
    }
}

/// The HTTP client shared by sources, checksum lookups and downloads.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}

/// GET `url` and fail on non-success statuses.
pub(crate) async fn get_success(request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
    debug!("GET {}", url);
    let response = request.send().await.map_err(|e| RelkeepError::Network {
        asset: url.to_string(),
        reason: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelkeepError::HttpStatus {
            asset: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }
    Ok(response)
}

/// Last non-empty path segment of a URL, without query or fragment.
pub(crate) fn url_file_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = path.split_once("://").map_or(path, |(_, rest)| rest);
    let (_, path) = without_scheme.split_once('/')?;
    path.rsplit('/').find(|segment| !segment.is_empty()).map(str::to_string)
}
