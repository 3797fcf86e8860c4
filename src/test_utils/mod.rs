//! Test utilities for relkeep
//!
//! Helpers shared by the unit tests and the integration suite:
//!
//! - [`StaticSource`]: a [`ReleaseSource`](crate::source::ReleaseSource) that
//!   serves canned releases per application
//! - [`RecordingProgress`]: a progress sink that remembers every event
//! - [`fixtures`]: release, asset and archive builders
//! - `TestServer` (feature `test-utils`): a local HTTP server with
//!   scripted responses, used to exercise downloads end to end
//!
//! # Example
//!
//! ```rust,no_run
//! use relkeep::test_utils::{StaticSource, fixtures};
//!
//! let source = StaticSource::new()
//!     .with_releases("App", vec![fixtures::release("v1.0", &["App-1.0.AppImage"], "http://127.0.0.1:9")]);
//! ```

pub mod fixtures;
#[cfg(feature = "test-utils")]
pub mod server;

#[cfg(feature = "test-utils")]
pub use server::{MockResponse, TestServer};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::ApplicationSpec;
use crate::engine::ProgressSink;
use crate::models::Release;
use crate::source::ReleaseSource;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Initializes the tracing subscriber once, however many tests call it. With
/// `None` the `RUST_LOG` environment variable decides; without it nothing is
/// logged.
///
/// ```bash
/// RUST_LOG=relkeep=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Serves fixed releases keyed by application name.
///
/// Applications without an entry fail with a "no releases configured"
/// error, which makes a forgotten fixture obvious in test output.
#[derive(Debug, Default)]
pub struct StaticSource {
    responses: HashMap<String, std::result::Result<Vec<Release>, String>>,
    calls: Mutex<Vec<String>>,
}

impl StaticSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `releases` for the application `name`.
    #[must_use]
    pub fn with_releases(mut self, name: &str, releases: Vec<Release>) -> Self {
        self.responses.insert(name.to_string(), Ok(releases));
        self
    }

    /// Fail every fetch for the application `name` with `message`.
    #[must_use]
    pub fn with_error(mut self, name: &str, message: &str) -> Self {
        self.responses.insert(name.to_string(), Err(message.to_string()));
        self
    }

    /// Application names fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReleaseSource for StaticSource {
    async fn fetch_releases(&self, app: &ApplicationSpec) -> Result<Vec<Release>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(app.name.clone());
        }
        match self.responses.get(&app.name) {
            Some(Ok(releases)) => Ok(releases.clone()),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no releases configured for '{}'", app.name)),
        }
    }
}

/// A progress event captured by [`RecordingProgress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A transfer attempt started
    Started {
        /// Asset name
        asset: String,
        /// Expected length
        total: Option<u64>,
    },
    /// Bytes written so far in the current attempt
    Advanced {
        /// Asset name
        asset: String,
        /// Bytes written
        done: u64,
    },
    /// The download ended
    Finished {
        /// Asset name
        asset: String,
        /// Whether it produced a usable file
        success: bool,
    },
}

/// A [`ProgressSink`] that records every event.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Number of attempts started for `asset`.
    pub fn attempts(&self, asset: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Started { asset: a, .. } if a == asset))
            .count()
    }

    /// How the download of `asset` ended, if it did.
    pub fn outcome(&self, asset: &str) -> Option<bool> {
        self.events().iter().rev().find_map(|e| match e {
            ProgressEvent::Finished {
                asset: a,
                success,
            } if a == asset => Some(*success),
            _ => None,
        })
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn started(&self, asset: &str, total: Option<u64>) {
        self.push(ProgressEvent::Started {
            asset: asset.to_string(),
            total,
        });
    }

    fn advanced(&self, asset: &str, done: u64, _total: Option<u64>) {
        self.push(ProgressEvent::Advanced {
            asset: asset.to_string(),
            done,
        });
    }

    fn finished(&self, asset: &str, success: bool) {
        self.push(ProgressEvent::Finished {
            asset: asset.to_string(),
            success,
        });
    }
}
