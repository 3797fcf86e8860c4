//! Command-line interface for relkeep.
//!
//! # Available Commands
//!
//! - `check` - Check applications for new releases and install them
//! - `list` - Show installed versions and rotation files
//! - `rollback` - Reactivate the previous version of an application
//! - `repair` - Reconcile download directories after an interruption
//!
//! # Global Options
//!
//! All commands support these global options:
//! - `--verbose` - Enable debug output
//! - `--quiet` - Only log errors
//! - `--no-progress` - Disable progress bars (also `RELKEEP_NO_PROGRESS`)
//! - `--config` - Path to the configuration file (also `RELKEEP_CONFIG`)
//!
//! # Example
//!
//! ```bash
//! # See what would be updated
//! relkeep check --dry-run
//!
//! # Update two applications, machine-readable output
//! relkeep check FreeCAD Inkscape --format json
//!
//! # Something went wrong with the new version
//! relkeep rollback FreeCAD
//! ```

mod check;
mod list;
mod repair;
mod rollback;

pub use check::CheckCommand;
pub use list::ListCommand;
pub use repair::RepairCommand;
pub use rollback::RollbackCommand;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::GlobalConfig;
use crate::engine::{MetadataFileStore, ProgressSink, UpdateEngine};
use crate::utils::progress::TerminalProgress;

/// Runtime configuration derived from the global flags.
///
/// Commands receive this instead of reading flags or environment variables
/// themselves, so tests can run them with an explicit configuration.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive; `None` keeps `RUST_LOG` or the default
    pub log_level: Option<String>,

    /// Hide progress bars
    pub no_progress: bool,

    /// Configuration file; `None` uses `~/.relkeep/config.toml`
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// A configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the level chosen by flags. Calling this more than
    /// once is harmless; only the first subscriber is installed.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(self.log_level.as_deref().unwrap_or("relkeep=info"))
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Load and validate the configuration file.
    pub async fn load_config(&self) -> Result<GlobalConfig> {
        let config = GlobalConfig::load_with_optional(self.config_path.clone()).await?;
        config.validate()?;
        Ok(config)
    }

    /// An engine persisting state next to the artifacts.
    pub fn engine(&self, config: &GlobalConfig) -> Result<UpdateEngine> {
        let progress: Arc<dyn ProgressSink> = Arc::new(TerminalProgress::new(self.no_progress));
        UpdateEngine::new(config.engine.clone(), Arc::new(MetadataFileStore), progress)
    }
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored
    #[default]
    Text,
    /// Pretty-printed JSON on stdout
    Json,
}

/// relkeep keeps downloaded release artifacts current.
#[derive(Parser)]
#[command(
    name = "relkeep",
    about = "Keep downloaded release artifacts up to date",
    version,
    long_about = "relkeep tracks upstream release feeds (GitHub, GitLab, direct URLs and download pages), \
                  downloads new versions with checksum verification and keeps older versions around for rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "RELKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true, env = "RELKEEP_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check applications for new releases and install them
    Check(CheckCommand),

    /// Show installed versions
    List(ListCommand),

    /// Reactivate the previous version of an application
    Rollback(RollbackCommand),

    /// Reconcile download directories after an interrupted update
    Repair(RepairCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// The runtime configuration the global flags describe.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("relkeep=debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress || self.quiet,
            config_path: self.config.clone(),
        }
    }

    /// Execute with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Check(cmd) => cmd.execute(&config).await,
            Commands::List(cmd) => cmd.execute(&config).await,
            Commands::Rollback(cmd) => cmd.execute(&config).await,
            Commands::Repair(cmd) => cmd.execute(&config).await,
        }
    }
}
