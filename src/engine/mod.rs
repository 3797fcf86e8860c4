//! The update engine.
//!
//! [`UpdateEngine`] composes the pipeline for each configured application:
//!
//! ```text
//! source ─▶ selector ─▶ version compare ─▶ download + verify ─▶ extract ─▶ rotate
//! ```
//!
//! - [`selector`] picks the newest eligible release and asset
//! - [`download`] fetches it through a process-wide worker pool, with
//!   [`verification`] applying the checksum policy
//! - [`archive`] pulls the artifact out of a container when needed
//! - [`rotation`] installs it as `.current` under a [`lock::DirectoryLock`]
//! - [`metadata`] records which version is installed
//!
//! Applications are checked concurrently, bounded by
//! `max_concurrent_checks`. Each check runs under its own timeout and
//! cancellation token, and any failure ends up in that application's
//! [`CheckResult`] instead of aborting the others.
//!
//! # Example
//!
//! ```rust,no_run
//! use relkeep::config::GlobalConfig;
//! use relkeep::engine::{MetadataFileStore, NoProgress, UpdateEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! let engine = UpdateEngine::new(
//!     config.engine.clone(),
//!     Arc::new(MetadataFileStore),
//!     Arc::new(NoProgress),
//! )?;
//!
//! for result in engine.check_all(&config.applications).await {
//!     println!("{}: {}", result.app_name, result.outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod download;
pub mod lock;
pub mod metadata;
pub mod rotation;
pub mod selector;
pub mod verification;

pub use download::{DownloadManager, DownloadRequest, DownloadSettings, NoProgress, ProgressSink};
pub use lock::DirectoryLock;
pub use metadata::{InstalledVersion, MemoryVersionStore, MetadataFileStore, VersionStore};
pub use rotation::{InstalledFileSet, RepairReport, Rollback, RotationManager};
pub use selector::{Selection, select_release, should_update};
pub use verification::{ChecksumVerifier, Verification};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ApplicationSpec, EngineConfig};
use crate::core::RelkeepError;
use crate::models::{CheckResult, Outcome, Warning};
use crate::pattern::AssetKind;
use crate::source::{ReleaseSource, create_source, http_client};
use crate::utils::fs::set_executable;

/// Behavior switches for a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Stop after selection and report `update-available` instead of installing
    pub dry_run: bool,
}

/// What is installed for one application.
#[derive(Debug, Clone)]
pub struct InstalledState {
    /// Recorded version metadata
    pub record: Option<InstalledVersion>,
    /// Files currently in the rotation set
    pub files: InstalledFileSet,
}

/// Checks and updates applications.
pub struct UpdateEngine {
    config: EngineConfig,
    options: EngineOptions,
    client: reqwest::Client,
    downloads: DownloadManager,
    store: Arc<dyn VersionStore>,
    source_override: Option<Arc<dyn ReleaseSource>>,
    cancel: CancellationToken,
}

impl UpdateEngine {
    /// Create an engine. Must be called inside a Tokio runtime, since the
    /// download workers start immediately.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn VersionStore>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let client = http_client()?;
        let downloads =
            DownloadManager::new(client.clone(), DownloadSettings::from_engine(&config), progress);

        Ok(Self {
            config,
            options: EngineOptions::default(),
            client,
            downloads,
            store,
            source_override: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Apply run options.
    #[must_use]
    pub const fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `source` for every application instead of the configured source type.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ReleaseSource>) -> Self {
        self.source_override = Some(source);
        self
    }

    /// Token that cancels every running check when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Check every application, returning one result per application in
    /// input order.
    pub async fn check_all(&self, applications: &[ApplicationSpec]) -> Vec<CheckResult> {
        let limit = self.config.max_concurrent_checks.max(1);
        info!("Checking {} application(s), {} at a time", applications.len(), limit);

        let mut results: Vec<(usize, CheckResult)> = stream::iter(applications.iter().enumerate())
            .map(|(index, app)| async move { (index, self.check_application(app).await) })
            .buffer_unordered(limit)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Check one application and install a newer version if there is one.
    ///
    /// Never fails: errors are reported as [`Outcome::Failed`].
    pub async fn check_application(&self, app: &ApplicationSpec) -> CheckResult {
        let token = self.cancel.child_token();
        // cancels queued and in-flight downloads when the check ends early
        let _guard = token.clone().drop_guard();
        let timeout = self.config.check_timeout();

        let outcome: Result<CheckResult> = tokio::select! {
            biased;
            () = token.cancelled() => Err(RelkeepError::Cancelled {
                operation: format!("check of '{}'", app.name),
            }
            .into()),
            result = tokio::time::timeout(timeout, self.run_check(app, &token)) => match result {
                Ok(result) => result,
                Err(_) => Err(RelkeepError::Cancelled {
                    operation: format!("check of '{}' after {}s", app.name, timeout.as_secs()),
                }
                .into()),
            },
        };

        match outcome {
            Ok(result) => {
                info!("{}: {}", app.name, result.outcome);
                result
            }
            Err(e) => {
                warn!("{}: {:#}", app.name, e);
                CheckResult::failed(&app.name, &e)
            }
        }
    }

    async fn run_check(&self, app: &ApplicationSpec, token: &CancellationToken) -> Result<CheckResult> {
        let dir = app.resolved_download_dir();
        let matcher = app.matcher()?;
        let installed = self.load_record(&dir, &app.name).await?;
        let old_version = installed.as_ref().map(|r| r.version.clone());

        let releases = self
            .source_for(app)
            .fetch_releases(app)
            .await
            .with_context(|| format!("Failed to fetch releases for '{}'", app.name))?;
        debug!("{}: {} release(s) from {}", app.name, releases.len(), app.url);

        let Some(selection) = select_release(&releases, &matcher, app.prerelease) else {
            return Ok(CheckResult {
                old_version,
                ..CheckResult::new(&app.name, Outcome::NoEligibleRelease)
            });
        };
        let Selection {
            candidate,
            mut warnings,
        } = selection;

        if !should_update(&candidate.version, old_version.as_deref()) {
            return Ok(CheckResult {
                old_version,
                new_version: Some(candidate.version),
                warnings,
                ..CheckResult::new(&app.name, Outcome::UpToDate)
            });
        }

        if self.options.dry_run {
            return Ok(CheckResult {
                old_version,
                new_version: Some(candidate.version),
                warnings,
                ..CheckResult::new(&app.name, Outcome::UpdateAvailable)
            });
        }

        info!(
            "{}: installing {} ({}) over {}",
            app.name,
            candidate.version,
            candidate.asset.name,
            old_version.as_deref().unwrap_or("nothing")
        );

        let siblings =
            candidate.release.assets.iter().filter(|a| a.name != candidate.asset.name).cloned().collect();
        let mut download = self
            .downloads
            .fetch_one(DownloadRequest {
                asset: candidate.asset.clone(),
                siblings,
                dest_dir: dir.clone(),
                checksum: app.checksum.clone(),
                cancel: token.clone(),
            })
            .await;

        warnings.append(&mut download.warnings);
        let downloaded = match (download.path.take(), download.error.take()) {
            (Some(path), None) => PendingFile::new(path),
            (_, error) => {
                return Err(error.unwrap_or_else(|| anyhow::anyhow!("download produced no file")))
                    .with_context(|| format!("Failed to download '{}'", candidate.asset.name));
            }
        };

        let (artifact, artifact_name, digest) = if candidate.kind == AssetKind::ArchiveContainer {
            let extraction =
                archive::extract_artifact(downloaded.path(), &candidate.asset.name, &dir, &app.artifact_extension)
                    .await?;
            // the extractor deleted the container
            downloaded.disarm();
            let artifact = PendingFile::new(extraction.path);
            warnings.extend(extraction.warnings);
            let digest =
                verification::compute_file_digest(artifact.path(), app.checksum.algorithm).await.ok();
            (artifact, extraction.file_name, digest)
        } else {
            set_executable(downloaded.path())?;
            (downloaded, candidate.asset.name.clone(), download.digest.take())
        };

        let record = InstalledVersion::new(&candidate.version, &artifact_name, digest);
        if let Some(warning) = self.install(app, installed.as_ref(), artifact, record).await? {
            warnings.push(warning);
        }

        Ok(CheckResult {
            old_version,
            new_version: Some(candidate.version),
            warnings,
            ..CheckResult::new(&app.name, Outcome::Updated)
        })
    }

    /// Repair, rotate and record under the directory lock.
    ///
    /// The blocking task runs to completion even if the check is cancelled
    /// meanwhile, so the rename sequence is never cut short. Once the new
    /// `.current` is live the install has happened, so a failure to record it
    /// is returned as a warning.
    async fn install(
        &self,
        app: &ApplicationSpec,
        previous: Option<&InstalledVersion>,
        artifact: PendingFile,
        record: InstalledVersion,
    ) -> Result<Option<Warning>> {
        let dir = app.resolved_download_dir();
        let rotation = rotation_for(app, previous)?.with_known_name(&record.file_name);
        let lock = DirectoryLock::acquire(&dir).await?;
        let store = Arc::clone(&self.store);
        let app_name = app.name.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<Warning>> {
            let report = rotation.repair(&lock)?;
            if !report.is_clean() {
                info!("Repaired {} before rotation: {:?}", dir.display(), report);
            }
            rotation.rotate(&lock, artifact.path(), &record.file_name)?;
            artifact.disarm();

            let version = record.version.clone();
            let warning = match store.record_install(&dir, &app_name, record) {
                Ok(_) => None,
                Err(e) => {
                    let warning = Warning::VersionNotRecorded {
                        version,
                        reason: format!("{e:#}"),
                    };
                    warn!("{}: {}", app_name, warning);
                    Some(warning)
                }
            };
            drop(lock);
            Ok(warning)
        })
        .await
        .context("spawn_blocking panicked")?
    }

    /// Swap the installed version with the previous one.
    pub async fn rollback(&self, app: &ApplicationSpec) -> Result<Rollback> {
        let dir = app.resolved_download_dir();
        let record = self.load_record(&dir, &app.name).await?;
        let rotation = rotation_for(app, record.as_ref())?;
        let lock = DirectoryLock::acquire(&dir).await?;
        let store = Arc::clone(&self.store);
        let app_name = app.name.clone();

        tokio::task::spawn_blocking(move || -> Result<Rollback> {
            let rollback = rotation.rollback(&lock)?;
            match record.and_then(InstalledVersion::rolled_back) {
                Some(rolled) => store.save(&dir, &app_name, &rolled)?,
                None => warn!(
                    "No version history for '{}'; the next check will reinstall the newest release",
                    app_name
                ),
            }
            Ok(rollback)
        })
        .await
        .context("spawn_blocking panicked")?
    }

    /// Reconcile an application's download directory.
    pub async fn repair(&self, app: &ApplicationSpec) -> Result<RepairReport> {
        let dir = app.resolved_download_dir();
        let record = self.load_record(&dir, &app.name).await?;
        let rotation = rotation_for(app, record.as_ref())?;
        let lock = DirectoryLock::acquire(&dir).await?;

        tokio::task::spawn_blocking(move || rotation.repair(&lock))
            .await
            .context("spawn_blocking panicked")?
    }

    /// The recorded version and rotation files of an application.
    pub async fn installed_state(&self, app: &ApplicationSpec) -> Result<InstalledState> {
        let dir = app.resolved_download_dir();
        let record = self.load_record(&dir, &app.name).await?;
        let rotation = rotation_for(app, record.as_ref())?;
        let files = tokio::task::spawn_blocking(move || rotation.scan())
            .await
            .context("spawn_blocking panicked")??;
        Ok(InstalledState {
            record,
            files,
        })
    }

    async fn load_record(&self, dir: &Path, app_name: &str) -> Result<Option<InstalledVersion>> {
        let store = Arc::clone(&self.store);
        let dir = dir.to_path_buf();
        let app_name = app_name.to_string();
        tokio::task::spawn_blocking(move || store.load(&dir, &app_name))
            .await
            .context("spawn_blocking panicked")?
    }

    fn source_for(&self, app: &ApplicationSpec) -> Arc<dyn ReleaseSource> {
        match &self.source_override {
            Some(source) => Arc::clone(source),
            None => create_source(app.source_kind(), self.client.clone()),
        }
    }
}

/// Rotation manager for `app`, also recognizing every file name recorded in
/// its version history.
fn rotation_for(app: &ApplicationSpec, record: Option<&InstalledVersion>) -> Result<RotationManager> {
    let mut rotation = RotationManager::new(app.resolved_download_dir(), app.matcher()?, &app.rotation)
        .with_symlink(app.resolved_symlink_path());
    if let Some(record) = record {
        rotation = rotation.with_known_name(&record.file_name);
        for entry in &record.history {
            rotation = rotation.with_known_name(&entry.file_name);
        }
    }
    Ok(rotation)
}

/// A downloaded file that is deleted unless it gets installed.
struct PendingFile {
    path: PathBuf,
    armed: bool,
}

impl PendingFile {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file; it was moved or deleted by someone else.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Discarded {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard {}: {}", self.path.display(), e),
        }
    }
}
