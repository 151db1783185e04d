//! # Fiscal Audit CLI
//!
//! Operator tool over a fiscal log database.
//!
//! ## Usage
//! ```bash
//! fiscal-audit register-device --device <ID> --store <ID>
//! fiscal-audit fiscalize --device <ID> --store <ID> --sale <ID> --amount 19.99
//! fiscal-audit verify
//! fiscal-audit --db ./data/fiscal.db head --device <ID>
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Exits with 2 on usage errors, 0 after printing --help.
    let cli = Cli::parse();
    init_tracing();

    match commands::run(cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the tracing subscriber on stderr.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=fiscal_chain=trace` - Trace the sequencer and service only
/// - Default: INFO, DEBUG for fiscal crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fiscal_core=debug,fiscal_db=debug,fiscal_chain=debug,sqlx=warn")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
