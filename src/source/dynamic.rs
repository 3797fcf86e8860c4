//! Download pages scraped for artifact links.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use super::{ReleaseSource, get_success, url_file_name};
use crate::config::ApplicationSpec;
use crate::models::{Asset, Release};
use crate::pattern::AssetMatcher;
use crate::version::VersionComparator;

/// An HTML page that links to the artifacts.
///
/// Every `href` on the page becomes an asset of one synthetic release. Links
/// matching the application's pattern are reduced to those carrying the
/// highest version in their file name and placed first; the remaining links
/// are kept so digest files can still be found next to the artifact.
#[derive(Debug, Clone)]
pub struct DynamicSource {
    client: reqwest::Client,
}

impl DynamicSource {
    /// A source using `client`.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }
}

#[async_trait]
impl ReleaseSource for DynamicSource {
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>> {
        let matcher = app.matcher()?;
        let page = get_success(self.client.get(&app.url), &app.url)
            .await?
            .text()
            .await
            .with_context(|| format!("Failed to read page {}", app.url))?;

        let base = Url::parse(&app.url).with_context(|| format!("Invalid page URL '{}'", app.url))?;
        let assets = harvest_links(&page, &base)?;
        debug!("Dynamic: {} link(s) on {}", assets.len(), app.url);

        Ok(vec![synthetic_release(assets, &matcher)])
    }
}

/// Every distinct link on `page`, resolved against `base`, in page order.
pub fn harvest_links(page: &str, base: &Url) -> Result<Vec<Asset>> {
    let href = Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)["']"#)?;
    let mut assets: Vec<Asset> = Vec::new();
    for capture in href.captures_iter(page) {
        let Ok(url) = base.join(capture[1].trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let url = url.to_string();
        let Some(name) = url_file_name(&url) else {
            continue;
        };
        if assets.iter().any(|a| a.url == url) {
            continue;
        }
        assets.push(Asset {
            name,
            url,
            size: None,
            digest: None,
        });
    }
    Ok(assets)
}

fn synthetic_release(assets: Vec<Asset>, matcher: &AssetMatcher) -> Release {
    let (matching, others): (Vec<Asset>, Vec<Asset>) =
        assets.into_iter().partition(|a| matcher.matches(&a.name));

    let versions: Vec<String> =
        matching.iter().filter_map(|a| VersionComparator::extract_from_name(&a.name)).collect();
    let newest = VersionComparator::get_latest(&versions).cloned();

    let mut kept: Vec<Asset> = match &newest {
        Some(newest) => matching
            .into_iter()
            .filter(|a| VersionComparator::extract_from_name(&a.name).as_ref() == Some(newest))
            .collect(),
        None => matching,
    };
    kept.extend(others);

    Release {
        tag: newest.unwrap_or_default(),
        published_at: None,
        prerelease: false,
        assets: kept,
    }
}
