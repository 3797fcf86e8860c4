//! Global constants used throughout the relkeep codebase.
//!
//! This module contains timeout durations, retry parameters, file naming
//! conventions and other numeric constants that are used across multiple
//! modules. Defining them centrally makes magic numbers more discoverable.

use std::time::Duration;

/// Maximum backoff delay for exponential backoff between download attempts (8s).
pub const MAX_BACKOFF_DELAY_MS: u64 = 8_000;

/// Starting delay for exponential backoff between download attempts (250ms).
///
/// This is the initial delay used in exponential backoff calculations,
/// which doubles on each retry attempt.
pub const STARTING_BACKOFF_DELAY_MS: u64 = 250;

/// Default per-attempt timeout for a single asset download (5 minutes).
pub fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Default timeout for one complete check-and-update of an application (30 minutes).
pub fn default_check_timeout() -> Duration {
    Duration::from_secs(1800)
}

/// Default time to wait for another process's rotation in the same directory (60s).
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Default number of retries for transient download failures.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default number of simultaneous downloads across the whole process.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Default number of applications checked at the same time.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 4;

/// Capacity of the download job queue shared by all workers.
pub const DOWNLOAD_QUEUE_CAPACITY: usize = 64;

/// Suffix of the active artifact in a download directory.
pub const CURRENT_SUFFIX: &str = ".current";

/// Suffix stem of retained older artifacts (`.old`, `.old2`, `.old3`, ...).
pub const OLD_SUFFIX: &str = ".old";

/// Suffix of in-flight download temporaries.
pub const PART_SUFFIX: &str = ".part";

/// Lock file guarding rotation inside a download directory.
pub const DIRECTORY_LOCK_FILE: &str = ".relkeep.lock";

/// Installed-version metadata file kept inside each download directory.
pub const STATE_FILE: &str = ".relkeep-state.json";

/// Number of previous versions remembered in the state file.
pub const MAX_HISTORY_ENTRIES: usize = 10;

/// Age after which an orphaned `.part` file is considered stale (1 hour).
pub const STALE_PART_TTL: Duration = Duration::from_secs(3600);

/// Default extension of the directly runnable artifact.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "AppImage";

/// Archive container extensions the extractor understands, longest first.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip"];

/// Default digest file pattern; `{filename}` is replaced by the asset name.
pub const DEFAULT_CHECKSUM_PATTERN: &str = "{filename}.sha256";

/// Default number of files kept per artifact, including the `.current` one.
pub const DEFAULT_RETAIN_COUNT: usize = 3;

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!("relkeep/", env!("CARGO_PKG_VERSION"));
