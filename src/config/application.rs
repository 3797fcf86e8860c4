//! Per-application configuration.
//!
//! Each `[[applications]]` entry of the configuration file becomes an
//! [`ApplicationSpec`]. The engine only ever receives it by shared reference.
//!
//! ```toml
//! [[applications]]
//! name = "FreeCAD"
//! url = "https://github.com/FreeCAD/FreeCAD"
//! download_dir = "~/Applications/FreeCAD"
//! pattern = 'FreeCAD.*x86_64.*\.AppImage$'
//!
//! [applications.checksum]
//! required = true
//!
//! [applications.rotation]
//! symlink_path = "~/Applications/FreeCAD.AppImage"
//! retain_count = 3
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_ARTIFACT_EXTENSION, DEFAULT_CHECKSUM_PATTERN, DEFAULT_RETAIN_COUNT};
use crate::pattern::{AssetKind, AssetMatcher, classify};

/// Where an application's releases are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// GitHub releases API
    Github,
    /// GitLab v4 releases API
    Gitlab,
    /// A single, fixed download URL
    Direct,
    /// An HTML page whose links are scanned for assets
    Dynamic,
}

impl SourceKind {
    /// Guess the source kind from a URL.
    ///
    /// ```rust
    /// use relkeep::config::SourceKind;
    ///
    /// assert_eq!(SourceKind::detect("https://github.com/owner/repo"), SourceKind::Github);
    /// assert_eq!(SourceKind::detect("https://gitlab.com/group/project"), SourceKind::Gitlab);
    /// assert_eq!(SourceKind::detect("https://example.com/App.AppImage"), SourceKind::Direct);
    /// assert_eq!(SourceKind::detect("https://example.com/downloads/"), SourceKind::Dynamic);
    /// ```
    pub fn detect(url: &str) -> Self {
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        let host = without_scheme.split('/').next().unwrap_or_default().to_ascii_lowercase();

        if host == "github.com" || host.ends_with(".github.com") {
            return Self::Github;
        }
        if host.starts_with("gitlab.") || host.contains(".gitlab.") {
            return Self::Gitlab;
        }

        let last_segment = without_scheme.split(['?', '#']).next().unwrap_or_default();
        let file_name = last_segment.rsplit('/').next().unwrap_or_default();
        if classify(file_name, DEFAULT_ARTIFACT_EXTENSION) != AssetKind::Other {
            Self::Direct
        } else {
            Self::Dynamic
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Direct => "direct",
            Self::Dynamic => "dynamic",
        };
        f.write_str(text)
    }
}

/// Digest algorithm used for checksum verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-1
    Sha1,
    /// MD5
    Md5,
}

impl ChecksumAlgorithm {
    /// Lowercase algorithm name as used in digest prefixes (`sha256:...`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Length of the hex encoded digest.
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumPolicy {
    /// Whether to verify at all
    pub enabled: bool,
    /// Digest algorithm
    pub algorithm: ChecksumAlgorithm,
    /// Digest file name or URL; `{filename}` is replaced by the asset name
    pub pattern: String,
    /// Fail the update when no digest can be found
    pub required: bool,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: ChecksumAlgorithm::Sha256,
            pattern: DEFAULT_CHECKSUM_PATTERN.to_string(),
            required: false,
        }
    }
}

impl ChecksumPolicy {
    /// Policy with verification turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Version retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Keep `.current`/`.old*` files; when off, new downloads overwrite in place
    pub enabled: bool,
    /// Symlink kept pointing at the `.current` file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symlink_path: Option<PathBuf>,
    /// Number of files kept, including the `.current` one
    pub retain_count: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            symlink_path: None,
            retain_count: DEFAULT_RETAIN_COUNT,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    DEFAULT_ARTIFACT_EXTENSION.to_string()
}

fn is_default_extension(extension: &str) -> bool {
    extension == DEFAULT_ARTIFACT_EXTENSION
}

/// One tracked application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Unique application name
    pub name: String,
    /// Release source; detected from `url` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceKind>,
    /// Repository, page or file URL
    pub url: String,
    /// Directory holding the installed files (`~` is expanded)
    pub download_dir: PathBuf,
    /// Case-insensitive asset regex; generated from `name` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Consider prereleases
    #[serde(default)]
    pub prerelease: bool,
    /// Extension of the directly runnable artifact
    #[serde(default = "default_extension", skip_serializing_if = "is_default_extension")]
    pub artifact_extension: String,
    /// Disabled applications are skipped by `check`
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Checksum verification policy
    #[serde(default)]
    pub checksum: ChecksumPolicy,
    /// Version retention policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

impl ApplicationSpec {
    /// An enabled application with default policies.
    pub fn new(name: impl Into<String>, url: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_type: None,
            url: url.into(),
            download_dir: download_dir.into(),
            pattern: None,
            prerelease: false,
            artifact_extension: default_extension(),
            enabled: true,
            checksum: ChecksumPolicy::default(),
            rotation: RotationPolicy::default(),
        }
    }

    /// The configured source kind, or the one detected from the URL.
    pub fn source_kind(&self) -> SourceKind {
        self.source_type.unwrap_or_else(|| SourceKind::detect(&self.url))
    }

    /// Compile the asset matcher for this application.
    pub fn matcher(&self) -> Result<AssetMatcher> {
        AssetMatcher::for_application(&self.name, self.pattern.as_deref(), &self.artifact_extension)
    }

    /// Download directory with `~` and environment variables expanded.
    pub fn resolved_download_dir(&self) -> PathBuf {
        expand_path(&self.download_dir)
    }

    /// Symlink path with `~` and environment variables expanded.
    pub fn resolved_symlink_path(&self) -> Option<PathBuf> {
        self.rotation.symlink_path.as_deref().map(expand_path)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}
