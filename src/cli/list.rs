//! Show what is installed for each configured application.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use super::{CliConfig, OutputFormat};
use crate::config::ApplicationSpec;
use crate::engine::InstalledState;
use crate::utils::fs::file_name_string;

/// Arguments of `relkeep list`.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// One row of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub enabled: bool,
    pub version: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
    pub current: Option<String>,
    pub previous: Vec<String>,
    pub history: Vec<String>,
}

impl ListEntry {
    fn new(app: &ApplicationSpec, state: InstalledState) -> Self {
        let InstalledState {
            record,
            files,
        } = state;
        Self {
            name: app.name.clone(),
            enabled: app.enabled,
            version: record.as_ref().map(|r| r.version.clone()),
            installed_at: record.as_ref().map(|r| r.installed_at),
            current: files.current().map(|m| file_name_string(&m.path)),
            previous: files.old().map(|m| file_name_string(&m.path)).collect(),
            history: record.map(|r| r.history.into_iter().map(|h| h.version).collect()).unwrap_or_default(),
        }
    }
}

impl ListCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let entries = self.collect(config).await?;
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            OutputFormat::Text => display_text(&entries),
        }
        Ok(())
    }

    /// One entry per configured application, in configuration order.
    pub async fn collect(&self, config: &CliConfig) -> Result<Vec<ListEntry>> {
        let global = config.load_config().await?;
        if global.applications.is_empty() {
            return Ok(Vec::new());
        }

        let engine = config.engine(&global)?;
        let mut entries = Vec::with_capacity(global.applications.len());
        for app in &global.applications {
            let state = engine.installed_state(app).await?;
            entries.push(ListEntry::new(app, state));
        }
        Ok(entries)
    }
}

fn display_text(entries: &[ListEntry]) {
    if entries.is_empty() {
        println!("{}", "No applications configured".yellow());
        return;
    }

    println!("\n{:<24} {:<16} {:<40} {}", "Application".bold(), "Version".bold(), "Active file".bold(), "Kept".bold());
    println!("{}", "─".repeat(90));

    for entry in entries {
        let name = if entry.enabled { entry.name.normal() } else { entry.name.bright_black() };
        let version = entry.version.as_deref().map_or_else(|| "-".bright_black(), |v| v.green());
        let current = entry.current.as_deref().unwrap_or("-");
        println!("{:<24} {:<16} {:<40} {}", name, version, current, entry.previous.len());
    }
}
