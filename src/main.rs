//! relkeep CLI entry point
//!
//! Parses the command line, runs the command and renders errors with
//! suggestions. See [`relkeep::cli`] for the available commands.

use anyhow::Result;
use clap::Parser;
use relkeep::cli;
use relkeep::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
