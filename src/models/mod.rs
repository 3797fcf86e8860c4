//! Shared data models for the update engine
//!
//! These are the source-agnostic records that flow between the engine stages:
//! release sources produce [`Release`]s, the selector turns them into a
//! [`SelectedCandidate`], the download manager produces [`DownloadResult`]s, and
//! every application check ends in exactly one [`CheckResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::pattern::AssetKind;

/// One published version of an upstream project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Tag or name identifying the release (e.g. `v1.2.3`, `continuous`)
    pub tag: String,
    /// Publish timestamp, when the source reports one
    pub published_at: Option<DateTime<Utc>>,
    /// Whether the source flags this release as not production ready
    pub prerelease: bool,
    /// Downloadable files, in the order the source declares them
    pub assets: Vec<Asset>,
}

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name as published
    pub name: String,
    /// Absolute download URL
    pub url: String,
    /// Size in bytes, if known
    pub size: Option<u64>,
    /// Source-declared digest or digest-file URL
    pub digest: Option<DigestHint>,
}

/// Integrity hint published by a source alongside an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DigestHint {
    /// The digest itself, optionally tagged with its algorithm (`sha256:abcd...`)
    Inline {
        /// Algorithm name when the source states it
        algorithm: Option<String>,
        /// Lowercase hex digest
        hex: String,
    },
    /// A file containing the digest
    Url {
        /// Where the digest file is published
        url: String,
    },
}

impl DigestHint {
    /// Interpret a raw digest string from a source API.
    ///
    /// Accepts `algo:hex`, bare hex, or an `http(s)://` URL. Anything else
    /// yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(Self::Url {
                url: raw.to_string(),
            });
        }

        let (algorithm, hex) = match raw.split_once(':') {
            Some((algo, hex)) => (Some(algo.to_ascii_lowercase()), hex),
            None => (None, raw),
        };

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        Some(Self::Inline {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

/// The release and asset chosen for one application in one check cycle.
#[derive(Debug, Clone)]
pub struct SelectedCandidate {
    /// The newest eligible release
    pub release: Release,
    /// The asset chosen from that release
    pub asset: Asset,
    /// Classification of the chosen asset
    pub kind: AssetKind,
    /// Version string recorded after installation
    pub version: String,
}

/// Terminal status of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Downloaded and checksum verified (or checksums disabled)
    Succeeded,
    /// Downloaded, but no digest was available and checksums are optional
    Unverified,
    /// The download was discarded
    Failed,
}

/// Outcome of the download manager for one asset.
#[derive(Debug)]
pub struct DownloadResult {
    /// Name of the asset that was requested
    pub asset_name: String,
    /// Temporary file inside the destination directory, set unless failed
    pub path: Option<PathBuf>,
    /// Hex digest of the downloaded bytes under the configured algorithm
    pub digest: Option<String>,
    /// Number of bytes written
    pub bytes: u64,
    /// Wall time spent, including retries
    pub elapsed: Duration,
    /// Terminal status
    pub status: DownloadStatus,
    /// Non-fatal conditions observed during the download
    pub warnings: Vec<Warning>,
    /// The failure, when `status` is [`DownloadStatus::Failed`]
    pub error: Option<anyhow::Error>,
}

impl DownloadResult {
    /// Whether the file is usable for installation.
    pub fn is_success(&self) -> bool {
        self.status != DownloadStatus::Failed
    }
}

/// Per-application outcome of a check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The installed version is the newest eligible one
    UpToDate,
    /// A newer version was downloaded and installed
    Updated,
    /// A newer version exists but the run was check-only
    UpdateAvailable,
    /// No release or asset passed filtering
    NoEligibleRelease,
    /// The check or update failed; see `error`
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UpToDate => "up-to-date",
            Self::Updated => "updated",
            Self::UpdateAvailable => "update-available",
            Self::NoEligibleRelease => "no-eligible-release",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Non-fatal conditions reported alongside a [`CheckResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Warning {
    /// Several assets matched equally well; the first was used
    AmbiguousMatch {
        /// Asset that was chosen
        chosen: String,
        /// All tied candidates, in release order
        candidates: Vec<String>,
    },
    /// The download was installed without a published digest
    UnverifiedChecksum {
        /// Asset that was not verified
        asset: String,
        /// Why the digest could not be resolved
        reason: String,
    },
    /// The archive held several artifacts; the first was extracted
    MultipleArchiveEntries {
        /// Archive file name
        archive: String,
        /// Entry that was extracted
        chosen: String,
        /// All matching entries, in listing order
        entries: Vec<String>,
    },
    /// The artifact was installed but its version could not be recorded
    VersionNotRecorded {
        /// Version that is now active
        version: String,
        /// Why the record could not be written
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousMatch {
                chosen,
                candidates,
            } => write!(
                f,
                "{} assets matched ({}), using '{chosen}'",
                candidates.len(),
                candidates.join(", ")
            ),
            Self::UnverifiedChecksum {
                asset,
                reason,
            } => write!(f, "'{asset}' installed without checksum verification: {reason}"),
            Self::MultipleArchiveEntries {
                archive,
                chosen,
                entries,
            } => write!(
                f,
                "'{archive}' contains {} artifacts ({}), extracted '{chosen}'",
                entries.len(),
                entries.join(", ")
            ),
            Self::VersionNotRecorded {
                version,
                reason,
            } => write!(f, "{version} is installed but was not recorded: {reason}"),
        }
    }
}

/// Structured result of checking one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Application name
    pub app_name: String,
    /// What happened
    pub outcome: Outcome,
    /// Version installed before the check, if any
    pub old_version: Option<String>,
    /// Version selected upstream (installed when outcome is `updated`)
    pub new_version: Option<String>,
    /// Non-fatal conditions encountered
    pub warnings: Vec<Warning>,
    /// Rendered error chain when the outcome is `failed`
    pub error: Option<String>,
}

impl CheckResult {
    /// A result with the given outcome and no versions, warnings or error.
    pub fn new(app_name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            app_name: app_name.into(),
            outcome,
            old_version: None,
            new_version: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// A failed result carrying the full error chain.
    pub fn failed(app_name: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            error: Some(format!("{error:#}")),
            ..Self::new(app_name, Outcome::Failed)
        }
    }
}
