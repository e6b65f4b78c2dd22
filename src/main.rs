//! Backup Restore Tool
//!
//! Pulls encrypted SQL Server backups from Google Drive, restores them and
//! records each completed upload in a tracking spreadsheet.

// restoretool/src/main.rs
mod archive;
mod config;
mod errors;
mod google;
mod model;
mod restore;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Env file to load before reading configuration (default: ./.env if present)
    #[arg(long)]
    env_file: Option<PathBuf>,
}

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    match run_app(args).await {
        Ok(_) => {
            println!("✅ Backup restore run completed.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(args: Args) -> Result<()> {
    let config = AppConfig::from_env(args.env_file.as_deref())
        .context("Failed to load application configuration")?;
    config.log_summary();

    let tools = config
        .check_prerequisites()
        .context("Prerequisite check failed")?;
    info!(
        seven_zip = %tools.seven_zip.display(),
        sqlcmd = %tools.sqlcmd.display(),
        "external tools found"
    );

    info!("🔄 Starting restore run...");
    let summary = restore::run_restore_flow(&config, &tools)
        .await
        .context("Restore run failed")?;
    if summary.failed_transient + summary.failed_permanent > 0 {
        info!(
            failed = summary.failed_transient + summary.failed_permanent,
            "some files failed, see log above"
        );
    }
    Ok(())
}
