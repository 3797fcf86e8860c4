//! Installed-version tracking.
//!
//! The engine needs to know which version of an application is installed in a
//! download directory. That association is read and written through the
//! [`VersionStore`] trait; the store is handed to the engine explicitly so
//! tests can substitute [`MemoryVersionStore`].
//!
//! [`MetadataFileStore`] keeps one JSON file per download directory
//! (`.relkeep-state.json`), keyed by application name:
//!
//! ```json
//! {
//!   "applications": {
//!     "App": {
//!       "version": "v1.1",
//!       "file_name": "App-1.1.AppImage",
//!       "digest": "9f86d08...",
//!       "installed_at": "2024-05-01T10:00:00Z",
//!       "history": [
//!         { "version": "v1.0", "file_name": "App-1.0.AppImage", "installed_at": "..." }
//!       ]
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::constants::{MAX_HISTORY_ENTRIES, STATE_FILE};
use crate::utils::fs::atomic_write;

/// A previously installed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Version string
    pub version: String,
    /// Asset file name it was installed from
    pub file_name: String,
    /// When it was installed
    pub installed_at: DateTime<Utc>,
}

/// The version currently installed for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Version string recorded at install time
    pub version: String,
    /// Asset file name it was installed from
    pub file_name: String,
    /// Hex digest of the installed file, when one was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// When it was installed
    pub installed_at: DateTime<Utc>,
    /// Earlier versions, newest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

impl InstalledVersion {
    /// A fresh record with no history.
    pub fn new(version: impl Into<String>, file_name: impl Into<String>, digest: Option<String>) -> Self {
        Self {
            version: version.into(),
            file_name: file_name.into(),
            digest,
            installed_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// The record after installing `next` on top of this one.
    ///
    /// The current version moves to the front of the history, which is capped
    /// at [`MAX_HISTORY_ENTRIES`].
    pub fn superseded_by(self, mut next: Self) -> Self {
        let mut history = Vec::with_capacity(self.history.len() + 1);
        history.push(HistoryEntry {
            version: self.version,
            file_name: self.file_name,
            installed_at: self.installed_at,
        });
        history.extend(self.history);
        history.truncate(MAX_HISTORY_ENTRIES);
        next.history = history;
        next
    }

    /// The record after rolling back to the newest history entry, or `None`
    /// when there is no history.
    pub fn rolled_back(self) -> Option<Self> {
        let mut history = self.history.into_iter();
        let previous = history.next()?;
        let mut remaining = vec![HistoryEntry {
            version: self.version,
            file_name: self.file_name,
            installed_at: self.installed_at,
        }];
        remaining.extend(history);
        remaining.truncate(MAX_HISTORY_ENTRIES);

        Some(Self {
            version: previous.version,
            file_name: previous.file_name,
            digest: None,
            installed_at: Utc::now(),
            history: remaining,
        })
    }
}

/// Persistence of the installed version per download directory and application.
///
/// Implementations are synchronous: the engine calls them from the blocking
/// task that performs rotation, while holding the directory lock.
pub trait VersionStore: Send + Sync {
    /// The installed version of `app` in `dir`, if recorded.
    fn load(&self, dir: &Path, app: &str) -> Result<Option<InstalledVersion>>;

    /// Replace the record for `app` in `dir`.
    fn save(&self, dir: &Path, app: &str, record: &InstalledVersion) -> Result<()>;

    /// Record a new install, pushing the previous record into the history.
    fn record_install(&self, dir: &Path, app: &str, installed: InstalledVersion) -> Result<InstalledVersion> {
        let record = match self.load(dir, app)? {
            Some(previous) => previous.superseded_by(installed),
            None => installed,
        };
        self.save(dir, app, &record)?;
        Ok(record)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    applications: BTreeMap<String, InstalledVersion>,
}

/// [`VersionStore`] backed by `.relkeep-state.json` in each download directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataFileStore;

impl MetadataFileStore {
    /// Path of the state file for `dir`.
    pub fn state_path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    fn read_state(dir: &Path) -> Result<StateFile> {
        let path = Self::state_path(dir);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse version state {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read version state {}", path.display()))
            }
        }
    }
}

impl VersionStore for MetadataFileStore {
    fn load(&self, dir: &Path, app: &str) -> Result<Option<InstalledVersion>> {
        Ok(Self::read_state(dir)?.applications.remove(app))
    }

    fn save(&self, dir: &Path, app: &str, record: &InstalledVersion) -> Result<()> {
        let mut state = Self::read_state(dir)?;
        state.applications.insert(app.to_string(), record.clone());
        let content =
            serde_json::to_vec_pretty(&state).context("Failed to serialize version state")?;
        atomic_write(&Self::state_path(dir), &content)
    }
}

/// In-memory [`VersionStore`] for tests and check-only runs.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    records: Mutex<HashMap<(PathBuf, String), InstalledVersion>>,
}

impl MemoryVersionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryVersionStore {
    fn load(&self, dir: &Path, app: &str) -> Result<Option<InstalledVersion>> {
        let records =
            self.records.lock().map_err(|_| anyhow::anyhow!("version store mutex poisoned"))?;
        Ok(records.get(&(dir.to_path_buf(), app.to_string())).cloned())
    }

    fn save(&self, dir: &Path, app: &str, record: &InstalledVersion) -> Result<()> {
        let mut records =
            self.records.lock().map_err(|_| anyhow::anyhow!("version store mutex poisoned"))?;
        records.insert((dir.to_path_buf(), app.to_string()), record.clone());
        Ok(())
    }
}
