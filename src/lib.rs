//! relkeep - keep downloaded release artifacts current
//!
//! relkeep tracks applications published as single-file artifacts (AppImages
//! and similar) on GitHub, GitLab, plain download URLs or download pages. For
//! each configured application it finds the newest eligible release, downloads
//! the matching asset with checksum verification, and installs it into a
//! download directory while keeping a bounded number of previous versions for
//! rollback.
//!
//! # Architecture Overview
//!
//! One check of one application flows through these stages:
//!
//! ```text
//! source ─► selector ─► download manager ─► checksum verifier
//!                                                │
//!                       archive extractor ◄──────┘  (only for .zip/.tar*)
//!                                │
//!                                ▼
//!                  rotation manager ─► version store
//! ```
//!
//! Applications are checked concurrently. A failure in one application is
//! reported in its [`CheckResult`](models::CheckResult) and never affects the
//! others. Nothing is written under a final file name before the download has
//! been verified, and installation in a directory is serialized by an
//! advisory lock.
//!
//! # Core Modules
//!
//! - [`engine`] - The update engine and its stages
//! - [`source`] - Release sources behind the [`ReleaseSource`](source::ReleaseSource) trait
//! - [`version`] - Ordering of free-form version strings
//! - [`pattern`] - Asset name matching and classification
//! - [`models`] - Records passed between the stages
//! - [`config`] - The TOML configuration file
//! - [`core`] - Error types and user-facing error rendering
//! - [`cli`] - The `relkeep` command line
//! - [`utils`] - File system helpers, backoff and progress display
//!
//! # Configuration
//!
//! ```toml
//! [engine]
//! max_concurrent_checks = 4
//! max_concurrent_downloads = 3
//! timeout_secs = 300
//! retries = 3
//!
//! [[applications]]
//! name = "FreeCAD"
//! url = "https://github.com/FreeCAD/FreeCAD"
//! download_dir = "~/Applications"
//! pattern = "FreeCAD.*x86_64.*\\.AppImage$"
//!
//! [applications.checksum]
//! algorithm = "sha256"
//! pattern = "{filename}-SHA256.txt"
//!
//! [applications.rotation]
//! symlink_path = "~/bin/freecad"
//! retain_count = 3
//! ```
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use relkeep::config::GlobalConfig;
//! use relkeep::engine::{MetadataFileStore, NoProgress, UpdateEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! config.validate()?;
//!
//! let engine = UpdateEngine::new(config.engine.clone(), Arc::new(MetadataFileStore), Arc::new(NoProgress))?;
//! for result in engine.check_all(&config.applications).await {
//!     println!("{}: {}", result.app_name, result.outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod engine;
pub mod models;
pub mod pattern;
pub mod source;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
