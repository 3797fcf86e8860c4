//! Check applications for new releases and install them.
//!
//! Applications are checked concurrently (bounded by
//! `engine.max_concurrent_checks`); one failing application never affects the
//! others. The process exits with status 1 when any application failed.
//!
//! # Examples
//!
//! ```bash
//! # Check and update every enabled application
//! relkeep check
//!
//! # Only report what would change
//! relkeep check --dry-run
//!
//! # Selected applications, JSON for scripts
//! relkeep check FreeCAD Inkscape --format json
//! ```
//!
//! Ctrl-C cancels in-flight downloads; affected applications are reported as
//! failed and their download directories are left untouched.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};

use super::{CliConfig, OutputFormat};
use crate::engine::EngineOptions;
use crate::models::{CheckResult, Outcome};

/// Arguments of `relkeep check`.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Applications to check (all enabled applications if omitted)
    #[arg(value_name = "APP")]
    pub apps: Vec<String>,

    /// Report available updates without downloading anything
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Counts per outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub total: usize,
    pub updated: usize,
    pub update_available: usize,
    pub up_to_date: usize,
    pub no_eligible_release: usize,
    pub failed: usize,
}

impl CheckSummary {
    fn from_results(results: &[CheckResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.outcome {
                Outcome::Updated => summary.updated += 1,
                Outcome::UpdateAvailable => summary.update_available += 1,
                Outcome::UpToDate => summary.up_to_date += 1,
                Outcome::NoEligibleRelease => summary.no_eligible_release += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    results: &'a [CheckResult],
    summary: &'a CheckSummary,
}

impl CheckCommand {
    /// Run the check and print the report. Exits with status 1 when any
    /// application failed.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let results = self.run(config).await?;
        let summary = CheckSummary::from_results(&results);

        match self.format {
            OutputFormat::Json => {
                let report = JsonReport {
                    results: &results,
                    summary: &summary,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => display_text(&results, &summary),
        }

        if summary.failed > 0 {
            std::process::exit(1);
        }
        Ok(())
    }

    /// Check the selected applications and return one result per application,
    /// in configuration order.
    pub async fn run(&self, config: &CliConfig) -> Result<Vec<CheckResult>> {
        let global = config.load_config().await?;
        let apps = global.select(&self.apps)?;
        if apps.is_empty() {
            info!("No applications configured");
            return Ok(Vec::new());
        }

        let engine = config.engine(&global)?.with_options(EngineOptions {
            dry_run: self.dry_run,
        });

        let token = engine.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running checks");
                token.cancel();
            }
        });

        info!("Checking {} application(s)", apps.len());
        let results = engine.check_all(&apps).await;
        interrupt.abort();
        Ok(results)
    }
}

fn display_text(results: &[CheckResult], summary: &CheckSummary) {
    if results.is_empty() {
        println!("{}", "No applications to check".yellow());
        return;
    }

    for result in results {
        let outcome = match result.outcome {
            Outcome::Updated => result.outcome.to_string().green(),
            Outcome::UpdateAvailable => result.outcome.to_string().cyan(),
            Outcome::UpToDate => result.outcome.to_string().normal(),
            Outcome::NoEligibleRelease => result.outcome.to_string().yellow(),
            Outcome::Failed => result.outcome.to_string().red(),
        };

        println!("{:<24} {:<20} {}", result.app_name.bold(), outcome, versions(result));

        for warning in &result.warnings {
            println!("  {} {}", "warning:".yellow(), warning);
        }
        if let Some(error) = &result.error {
            println!("  {} {}", "error:".red(), error);
        }
    }

    println!("\n{}", "Summary:".bold());
    println!("  {} checked", summary.total);
    if summary.updated > 0 {
        println!("  {} updated", summary.updated.to_string().green());
    }
    if summary.update_available > 0 {
        println!("  {} with updates available", summary.update_available.to_string().cyan());
    }
    println!("  {} up to date", summary.up_to_date.to_string().green());
    if summary.no_eligible_release > 0 {
        println!("  {} without an eligible release", summary.no_eligible_release.to_string().yellow());
    }
    if summary.failed > 0 {
        println!("  {} failed", summary.failed.to_string().red());
    }
}

fn versions(result: &CheckResult) -> String {
    match (&result.old_version, &result.new_version) {
        (Some(old), Some(new)) if old != new => format!("{old} -> {new}"),
        (None, Some(new)) => format!("(none) -> {new}"),
        (Some(old), _) => old.clone(),
        (None, None) => String::new(),
    }
}
