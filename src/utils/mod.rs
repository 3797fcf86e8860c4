//! Utility modules shared across relkeep
//!
//! - [`fs`] - atomic writes, executable bits and symlink replacement
//! - [`backoff`] - retry delay schedules for the download manager
//! - [`progress`] - terminal progress bars for downloads

pub mod backoff;
pub mod fs;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, replace_symlink, set_executable};
pub use progress::TerminalProgress;
