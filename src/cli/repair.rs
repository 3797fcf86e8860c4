//! Reconcile download directories after an interrupted update.
//!
//! Closes gaps in the `.old` numbering, demotes surplus `.current` files,
//! enforces retention, deletes stale temporaries and repoints the symlink.
//! Safe to run at any time; a consistent directory is left unchanged.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use super::CliConfig;
use crate::engine::RepairReport;

/// Arguments of `relkeep repair`.
#[derive(Debug, Args)]
pub struct RepairCommand {
    /// Applications to repair (all enabled applications if omitted)
    #[arg(value_name = "APP")]
    pub apps: Vec<String>,
}

impl RepairCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let reports = self.run(config).await?;
        for (name, report) in &reports {
            if report.is_clean() {
                println!("{} {}: nothing to repair", "✓".green(), name.bold());
                continue;
            }
            println!("{} {}:", "✓".green(), name.bold());
            for path in &report.renamed {
                println!("  renamed   {}", path.display());
            }
            for path in &report.removed {
                println!("  removed   {}", path.display());
            }
            for path in &report.stale_temporaries {
                println!("  cleaned   {}", path.display());
            }
            if report.symlink_repointed {
                println!("  symlink   repointed");
            }
        }
        Ok(())
    }

    /// Repair the selected applications, in configuration order.
    pub async fn run(&self, config: &CliConfig) -> Result<Vec<(String, RepairReport)>> {
        let global = config.load_config().await?;
        let apps = global.select(&self.apps)?;
        if apps.is_empty() {
            return Ok(Vec::new());
        }

        let engine = config.engine(&global)?;
        let mut reports = Vec::with_capacity(apps.len());
        for app in &apps {
            info!("Repairing {}", app.name);
            let report = engine.repair(app).await?;
            reports.push((app.name.clone(), report));
        }
        Ok(reports)
    }
}
