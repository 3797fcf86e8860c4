//! Release selection.
//!
//! Picks the single best release and asset for an application:
//!
//! 1. Drop prereleases unless the application opts in.
//! 2. Order by publish time, newest first; releases without a timestamp sort
//!    last, and ties are broken by comparing tags (newest wins).
//! 3. Only the first release is considered. Its assets are filtered by the
//!    application's pattern, primary artifacts are preferred over archives, and
//!    anything else is rejected.
//! 4. When several assets tie, the first in the release's order wins and an
//!    [`Warning::AmbiguousMatch`] is reported.
//!
//! `None` means "no eligible release". That is a normal outcome, not an error.

use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::models::{Asset, Release, SelectedCandidate, Warning};
use crate::pattern::{AssetKind, AssetMatcher};
use crate::version::VersionComparator;

/// A selected candidate and the warnings raised while choosing it.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen release and asset
    pub candidate: SelectedCandidate,
    /// Non-fatal conditions, e.g. ambiguous matches
    pub warnings: Vec<Warning>,
}

/// Select the newest eligible release and its target asset.
pub fn select_release(
    releases: &[Release],
    matcher: &AssetMatcher,
    include_prerelease: bool,
) -> Option<Selection> {
    let mut eligible: Vec<&Release> =
        releases.iter().filter(|r| include_prerelease || !r.prerelease).collect();

    if eligible.is_empty() {
        debug!("No releases left after prerelease filtering ({} total)", releases.len());
        return None;
    }

    eligible.sort_by(|a, b| newest_first(a, b));
    let release = eligible[0];

    let matching: Vec<(&Asset, AssetKind)> = release
        .assets
        .iter()
        .filter(|asset| matcher.matches(&asset.name))
        .map(|asset| (asset, matcher.classify(&asset.name)))
        .filter(|(_, kind)| *kind != AssetKind::Other)
        .collect();

    let kind = if matching.iter().any(|(_, k)| *k == AssetKind::PrimaryArtifact) {
        AssetKind::PrimaryArtifact
    } else if matching.iter().any(|(_, k)| *k == AssetKind::ArchiveContainer) {
        AssetKind::ArchiveContainer
    } else {
        debug!(
            "Release '{}' has no asset matching '{}' ({} assets)",
            release.tag,
            matcher.pattern(),
            release.assets.len()
        );
        return None;
    };

    let tied: Vec<&Asset> =
        matching.into_iter().filter(|(_, k)| *k == kind).map(|(asset, _)| asset).collect();
    let asset = tied[0];

    let mut warnings = Vec::new();
    if tied.len() > 1 {
        let warning = Warning::AmbiguousMatch {
            chosen: asset.name.clone(),
            candidates: tied.iter().map(|a| a.name.clone()).collect(),
        };
        warn!("{}", warning);
        warnings.push(warning);
    }

    Some(Selection {
        candidate: SelectedCandidate {
            release: release.clone(),
            asset: asset.clone(),
            kind,
            version: release_version(release, asset),
        },
        warnings,
    })
}

/// Whether `candidate` should be installed over `installed`.
///
/// True when nothing is installed or the candidate orders strictly after it.
pub fn should_update(candidate: &str, installed: Option<&str>) -> bool {
    installed.is_none_or(|current| VersionComparator::is_newer(candidate, current))
}

fn newest_first(a: &Release, b: &Release) -> Ordering {
    let by_time = match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| VersionComparator::compare(&b.tag, &a.tag))
}

/// The release tag, or a version pulled from the asset name when the source
/// has no meaningful tag.
fn release_version(release: &Release, asset: &Asset) -> String {
    if !release.tag.trim().is_empty() {
        return release.tag.clone();
    }
    VersionComparator::extract_from_name(&asset.name).unwrap_or_else(|| asset.name.clone())
}
