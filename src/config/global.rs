//! Global configuration for relkeep.
//!
//! The configuration file lists the tracked applications and tunes the
//! engine's concurrency, timeouts and retries.
//!
//! # Location
//!
//! - **Unix/macOS**: `~/.relkeep/config.toml`
//! - **Windows**: `%LOCALAPPDATA%\relkeep\config.toml`
//!
//! The location can be overridden with `--config` or the `RELKEEP_CONFIG`
//! environment variable. A missing file is not an error: it yields an empty
//! configuration.
//!
//! # File Format
//!
//! ```toml
//! [engine]
//! max_concurrent_checks = 4
//! max_concurrent_downloads = 3
//! timeout_secs = 300
//! retries = 3
//! check_timeout_secs = 1800
//!
//! [[applications]]
//! name = "App"
//! url = "https://github.com/owner/app"
//! download_dir = "~/Applications/App"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use super::application::ApplicationSpec;
use crate::constants::{
    DEFAULT_MAX_CONCURRENT_CHECKS, DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_RETRIES,
    default_check_timeout, default_download_timeout,
};
use crate::core::RelkeepError;

/// Engine tuning knobs from the `[engine]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applications checked at the same time
    pub max_concurrent_checks: usize,
    /// Downloads in flight at the same time, across all applications
    pub max_concurrent_downloads: usize,
    /// Per-attempt download timeout in seconds
    pub timeout_secs: u64,
    /// Retries after a transient download failure
    pub retries: u32,
    /// Deadline for one application's whole check-and-update, in seconds
    pub check_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            timeout_secs: default_download_timeout().as_secs(),
            retries: DEFAULT_RETRIES,
            check_timeout_secs: default_check_timeout().as_secs(),
        }
    }
}

impl EngineConfig {
    /// Per-attempt download timeout.
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Per-application deadline.
    pub const fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

fn is_default_engine(config: &EngineConfig) -> bool {
    *config == EngineConfig::default()
}

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Engine tuning
    #[serde(default, skip_serializing_if = "is_default_engine")]
    pub engine: EngineConfig,

    /// Tracked applications, in file order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<ApplicationSpec>,
}

impl GlobalConfig {
    /// Load from the default location, or return an empty configuration when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from the default location.
    ///
    /// A missing file yields the default configuration in both cases.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    ///
    /// ```rust,no_run
    /// use relkeep::config::GlobalConfig;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let config = GlobalConfig::load_from(Path::new("/etc/relkeep.toml")).await?;
    /// config.validate()?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .map_err(RelkeepError::from)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut perms = fs::metadata(path)
                .await
                .with_context(|| format!("Failed to read permissions for {}", path.display()))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms).await.with_context(|| {
                format!("Failed to set permissions on {}", path.display())
            })?;
        }

        Ok(())
    }

    /// Platform default configuration path.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("relkeep")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".relkeep")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Check the configuration for mistakes the engine cannot recover from.
    ///
    /// # Errors
    ///
    /// Returns [`RelkeepError::Config`] for duplicate or empty names, empty
    /// URLs, a zero retain count or zero concurrency, and
    /// [`RelkeepError::InvalidPattern`] for patterns that do not compile.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_checks == 0 || self.engine.max_concurrent_downloads == 0 {
            return Err(config_error("concurrency limits must be at least 1"));
        }

        let mut seen = HashSet::new();
        for app in &self.applications {
            if app.name.trim().is_empty() {
                return Err(config_error("application name must not be empty"));
            }
            if !seen.insert(app.name.as_str()) {
                return Err(config_error(format!("duplicate application name '{}'", app.name)));
            }
            if app.url.trim().is_empty() {
                return Err(config_error(format!("application '{}' has an empty url", app.name)));
            }
            if app.rotation.retain_count == 0 {
                return Err(config_error(format!(
                    "application '{}' has retain_count = 0; at least the current file must be kept",
                    app.name
                )));
            }
            app.matcher().with_context(|| format!("Invalid pattern for application '{}'", app.name))?;
        }

        Ok(())
    }

    /// Look up an application by name.
    pub fn application(&self, name: &str) -> Option<&ApplicationSpec> {
        self.applications.iter().find(|app| app.name == name)
    }

    /// Select applications by name, or all enabled ones when `names` is empty.
    ///
    /// Explicitly named applications are returned even when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RelkeepError::Config`] for a name that is not configured.
    pub fn select(&self, names: &[String]) -> Result<Vec<ApplicationSpec>> {
        if names.is_empty() {
            return Ok(self.applications.iter().filter(|app| app.enabled).cloned().collect());
        }

        names
            .iter()
            .map(|name| {
                self.application(name)
                    .cloned()
                    .ok_or_else(|| config_error(format!("unknown application '{name}'")))
            })
            .collect()
    }
}

fn config_error(message: impl Into<String>) -> anyhow::Error {
    RelkeepError::Config {
        message: message.into(),
    }
    .into()
}
