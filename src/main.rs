//! pkgdb CLI Entry Point
//!
//! Loads packages from configuration, aggregates them and runs one `db`
//! subcommand between the startup and shutdown transitions.
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use pkgdb::commands::{self, CommandOutput, DbCommand};
use pkgdb::{aggregate, AppConfig, ErrorEnvelope, Metadata, SuccessEnvelope};

/// pkgdb - Multi-package database registry
#[derive(Parser)]
#[command(name = "pkgdb")]
#[command(about = "Database connections, tables and seeders shared across packages")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the global file merged with .pkgdb/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema and seed tooling, per physical database
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.verbose) {
        eprintln!("Failed to initialize logging: {err}");
    }

    let Commands::Db { command } = &cli.command;
    let start = Instant::now();

    match execute(cli.config.as_deref(), command).await {
        Ok(output) => {
            let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            let meta = match output.partitions() {
                Some(partitions) => Metadata::with_partitions(elapsed, partitions),
                None => Metadata::new(elapsed),
            };
            print_json(&SuccessEnvelope::new(command.name(), output, meta));
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(code = err.error_code(), "Command failed");
            print_json(&ErrorEnvelope::from_error(command.name(), &err));
            ExitCode::FAILURE
        }
    }
}

async fn execute(config: Option<&Path>, command: &DbCommand) -> pkgdb::Result<CommandOutput> {
    let app = match config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load_with_precedence()?,
    };
    let registry = aggregate(app.into_packages()?)?;

    // Unknown names fail before any pool is opened
    commands::resolve(&registry, command)?;
    if !command.requires_connection() {
        return commands::run(&registry, command).await;
    }

    let result = match registry.startup().await {
        Ok(()) => commands::run(&registry, command).await,
        Err(err) => Err(err),
    };
    if let Err(err) = registry.shutdown().await {
        tracing::warn!(error = %err, "Shutdown failed");
    }
    result
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("Failed to serialize output: {err}"),
    }
}
