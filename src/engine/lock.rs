//! Directory-scoped file locking for rotation.
//!
//! Rotations that target the same download directory must never interleave,
//! whether they come from two applications sharing a directory in one run or
//! from two relkeep processes. [`DirectoryLock`] serializes them with an OS
//! file lock on `<download_dir>/.relkeep.lock`.
//!
//! # Async Safety
//!
//! All file operations are wrapped in `spawn_blocking`, and acquisition polls
//! `try_lock_exclusive` with exponential backoff instead of blocking a runtime
//! worker. The lock itself is held by the open file handle and released when
//! the [`DirectoryLock`] is dropped, which makes it safe to move into a
//! blocking task.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

use crate::constants::{DIRECTORY_LOCK_FILE, MAX_BACKOFF_DELAY_MS, default_lock_timeout};
use crate::core::RelkeepError;

/// Exclusive lock over one download directory.
#[derive(Debug)]
pub struct DirectoryLock {
    /// The file handle - lock is released when this is dropped
    _file: Arc<File>,
    directory: PathBuf,
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        debug!(directory = %self.directory.display(), "Directory lock released");
    }
}

impl DirectoryLock {
    /// Acquire the lock for `directory`, creating the directory if needed.
    ///
    /// Waits up to the default lock timeout for another holder to finish.
    pub async fn acquire(directory: &Path) -> Result<Self> {
        Self::acquire_with_timeout(directory, default_lock_timeout()).await
    }

    /// Acquire the lock, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RelkeepError::Rotation`] on timeout, or a filesystem error if
    /// the lock file cannot be created.
    pub async fn acquire_with_timeout(directory: &Path, timeout: Duration) -> Result<Self> {
        debug!(directory = %directory.display(), "Waiting for directory lock");

        tokio::fs::create_dir_all(directory).await.with_context(|| {
            format!("Failed to create download directory: {}", directory.display())
        })?;

        let lock_path = directory.join(DIRECTORY_LOCK_FILE);
        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        let file = Arc::new(file);
        let start = std::time::Instant::now();

        // 10ms, 100ms, 1s ... capped
        let backoff = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let file_clone = Arc::clone(&file);
            let lock_result = tokio::task::spawn_blocking(move || file_clone.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            match lock_result {
                Ok(true) => {
                    debug!(
                        directory = %directory.display(),
                        wait_ms = start.elapsed().as_millis(),
                        "Directory lock acquired"
                    );
                    return Ok(Self {
                        _file: file,
                        directory: directory.to_path_buf(),
                    });
                }
                Ok(false) | Err(_) => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        break;
                    }
                    tokio::time::sleep(delay.min(remaining)).await;
                }
            }
        }

        Err(RelkeepError::Rotation {
            directory: directory.display().to_string(),
            reason: format!("timed out after {timeout:?} waiting for another rotation to finish"),
        }
        .into())
    }

    /// The locked directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
