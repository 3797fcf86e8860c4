//! A fixed download URL.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use tracing::debug;

use super::{ReleaseSource, get_success, url_file_name};
use crate::config::ApplicationSpec;
use crate::core::RelkeepError;
use crate::models::{Asset, Release};
use crate::version::VersionComparator;

/// The application URL points straight at the artifact.
///
/// The single asset is described with a `HEAD` request. Its version comes
/// from the file name when it contains one, otherwise from the
/// `Last-Modified` header, so an unversioned "latest" URL is still updated
/// when the server publishes a new file.
#[derive(Debug, Clone)]
pub struct DirectSource {
    client: reqwest::Client,
}

impl DirectSource {
    /// A source using `client`.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }
}

#[async_trait]
impl ReleaseSource for DirectSource {
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>> {
        let name = url_file_name(&app.url).ok_or_else(|| RelkeepError::Config {
            message: format!("'{}' does not name a file to download", app.url),
        })?;

        let response = get_success(self.client.head(&app.url), &app.url).await?;
        let headers = response.headers();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let modified = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()).and_then(parse_http_date);

        let release = direct_release(&app.url, name, size, modified);
        debug!("Direct: {} version '{}'", release.assets[0].name, release.tag);
        Ok(vec![release])
    }
}

fn direct_release(url: &str, name: String, size: Option<u64>, modified: Option<DateTime<Utc>>) -> Release {
    let tag = VersionComparator::extract_from_name(&name)
        .or_else(|| modified.map(|m| m.format("%Y.%m.%d.%H%M%S").to_string()))
        .unwrap_or_default();

    Release {
        tag,
        published_at: modified,
        prerelease: false,
        assets: vec![Asset {
            name,
            url: url.to_string(),
            size,
            digest: None,
        }],
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value).ok().map(|d| d.with_timezone(&Utc))
}
