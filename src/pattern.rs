//! Asset name matching for release selection.
//!
//! Each application is configured with a regular expression describing the
//! asset it tracks (for example `MyApp.*x86_64\.AppImage$`). Matching is always
//! case-insensitive: upstream projects are not consistent about `AppImage` vs
//! `appimage`. When no pattern is configured, one is generated from the
//! application name and the known artifact and archive extensions.
//!
//! Besides matching, assets are classified by extension so the selector can
//! prefer a directly runnable artifact over an archive that merely contains one.
//!
//! # Examples
//!
//! ```rust
//! use relkeep::pattern::{AssetKind, AssetMatcher};
//!
//! # fn example() -> anyhow::Result<()> {
//! let matcher = AssetMatcher::new(r"App.*\.AppImage$", "AppImage")?;
//! assert!(matcher.matches("app-1.0-x86_64.APPIMAGE"));
//! assert_eq!(matcher.classify("App.zip"), AssetKind::ArchiveContainer);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::{ARCHIVE_EXTENSIONS, DEFAULT_ARTIFACT_EXTENSION};
use crate::core::RelkeepError;

/// Classification of an asset by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    /// The directly runnable artifact format
    PrimaryArtifact,
    /// A container holding the artifact (`.zip`, `.tar.gz`, `.tgz`, `.tar`)
    ArchiveContainer,
    /// Anything else; never selected
    Other,
}

/// Compiled, case-insensitive asset name matcher.
#[derive(Debug, Clone)]
pub struct AssetMatcher {
    regex: Regex,
    extension: String,
}

impl AssetMatcher {
    /// Compile `pattern` for assets whose primary extension is `extension`.
    ///
    /// `extension` may be given with or without a leading dot.
    ///
    /// # Errors
    ///
    /// Returns [`RelkeepError::InvalidPattern`] when `pattern` is not a valid
    /// regular expression.
    pub fn new(pattern: &str, extension: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build().map_err(|e| {
            RelkeepError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            regex,
            extension: normalize_extension(extension),
        })
    }

    /// Build the matcher for an application, generating a pattern from its
    /// name when none is configured.
    pub fn for_application(name: &str, pattern: Option<&str>, extension: &str) -> Result<Self> {
        match pattern {
            Some(pattern) => Self::new(pattern, extension),
            None => {
                let generated = fallback_pattern(name, extension);
                trace!("Generated match pattern '{}' for {}", generated, name);
                Self::new(&generated, extension)
            }
        }
    }

    /// Whether `asset_name` matches the configured pattern.
    pub fn matches(&self, asset_name: &str) -> bool {
        self.regex.is_match(asset_name)
    }

    /// Classify `asset_name` by its extension.
    pub fn classify(&self, asset_name: &str) -> AssetKind {
        classify(asset_name, &self.extension)
    }

    /// The source text of the compiled pattern.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// The primary artifact extension, without a leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Classify a file name against a primary artifact extension.
///
/// ```rust
/// use relkeep::pattern::{classify, AssetKind};
///
/// assert_eq!(classify("App.AppImage", "AppImage"), AssetKind::PrimaryArtifact);
/// assert_eq!(classify("App.tar.gz", "AppImage"), AssetKind::ArchiveContainer);
/// assert_eq!(classify("App.deb", "AppImage"), AssetKind::Other);
/// ```
pub fn classify(asset_name: &str, extension: &str) -> AssetKind {
    let lower = asset_name.to_ascii_lowercase();
    let primary = format!(".{}", normalize_extension(extension).to_ascii_lowercase());

    if lower.ends_with(&primary) {
        AssetKind::PrimaryArtifact
    } else if ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        AssetKind::ArchiveContainer
    } else {
        AssetKind::Other
    }
}

/// Pattern used when an application has none configured: the escaped name,
/// anything, then the artifact or an archive extension.
pub fn fallback_pattern(name: &str, extension: &str) -> String {
    let mut extensions = vec![regex::escape(&format!(".{}", normalize_extension(extension)))];
    extensions.extend(ARCHIVE_EXTENSIONS.iter().map(|ext| regex::escape(ext)));
    format!("^{}.*({})$", regex::escape(name), extensions.join("|"))
}

fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        DEFAULT_ARTIFACT_EXTENSION.to_string()
    } else {
        trimmed.to_string()
    }
}
