//! Reactivate the previous version of an application.
//!
//! Swaps `<artifact>.current` with the newest `.old` file under the directory
//! lock, repoints the symlink and restores the previous version record.
//!
//! ```bash
//! relkeep rollback FreeCAD
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;
use crate::core::RelkeepError;
use crate::engine::Rollback;
use crate::utils::fs::file_name_string;

/// Arguments of `relkeep rollback`.
#[derive(Debug, Args)]
pub struct RollbackCommand {
    /// Application to roll back
    #[arg(value_name = "APP")]
    pub app: String,
}

impl RollbackCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let rollback = self.run(config).await?;
        println!(
            "{} {}: {} is active again ({} kept as previous)",
            "✓".green(),
            self.app.bold(),
            file_name_string(&rollback.restored),
            file_name_string(&rollback.demoted)
        );
        Ok(())
    }

    /// Roll back and return the swapped files.
    pub async fn run(&self, config: &CliConfig) -> Result<Rollback> {
        let global = config.load_config().await?;
        let app = global.application(&self.app).ok_or_else(|| RelkeepError::Config {
            message: format!("unknown application '{}'", self.app),
        })?;
        config.engine(&global)?.rollback(app).await
    }
}
