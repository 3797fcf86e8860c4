//! Terminal progress display for downloads
//!
//! [`TerminalProgress`] renders one `indicatif` bar per in-flight download,
//! stacked in a `MultiProgress`. It is the CLI's implementation of
//! [`ProgressSink`]; the engine itself never depends on it.
//!
//! # Environment Variables
//!
//! - `RELKEEP_NO_PROGRESS`: Set to any value to disable all progress bars
//!
//! Bars are also hidden when stderr is not a terminal, which `indicatif`
//! detects on its own.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::ProgressSink;

/// Checks if progress bars should be disabled via `RELKEEP_NO_PROGRESS`.
pub fn is_progress_disabled() -> bool {
    std::env::var_os("RELKEEP_NO_PROGRESS").is_some()
}

/// Per-download progress bars.
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalProgress {
    /// Progress display on stderr, hidden when `disabled` is set or
    /// `RELKEEP_NO_PROGRESS` is present.
    pub fn new(disabled: bool) -> Self {
        let multi = if disabled || is_progress_disabled() {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(&self, asset: &str) -> Option<ProgressBar> {
        self.bars.lock().ok().and_then(|bars| bars.get(asset).cloned())
    }
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold.cyan} {spinner:.cyan} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

impl ProgressSink for TerminalProgress {
    fn started(&self, asset: &str, total: Option<u64>) {
        let bar = match total {
            Some(len) => ProgressBar::new(len).with_style(download_style()),
            None => ProgressBar::new_spinner().with_style(spinner_style()),
        };
        let bar = self.multi.add(bar.with_prefix(asset.to_string()));

        if let Ok(mut bars) = self.bars.lock() {
            // a retry restarts the transfer; drop the previous attempt's bar
            if let Some(previous) = bars.insert(asset.to_string(), bar) {
                previous.finish_and_clear();
                self.multi.remove(&previous);
            }
        }
    }

    fn advanced(&self, asset: &str, done: u64, _total: Option<u64>) {
        if let Some(bar) = self.bar_for(asset) {
            bar.set_position(done);
        }
    }

    fn finished(&self, asset: &str, success: bool) {
        let bar = self.bars.lock().ok().and_then(|mut bars| bars.remove(asset));
        if let Some(bar) = bar {
            if success {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}
