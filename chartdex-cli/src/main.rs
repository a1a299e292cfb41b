//! chartdex - keep object-store chart repository indexes in step with storage
//!
//! Main entry point: argument parsing, logging setup and exit codes

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use chartdex_core::repo::{ErrorKind, IndexSchema, RepoError};

mod repo_cli;

use repo_cli::Command;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "chartdex",
    about = "Manage chart repositories stored in object storage",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    log_json: bool,

    /// Index layout to read and write (current or legacy)
    #[clap(long, default_value = "current", global = true)]
    schema: IndexSchema,
}

fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        // Logs go to stderr; stdout carries command output such as `fetch`
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Process exit code for a failed command
fn exit_code(error: &anyhow::Error) -> u8 {
    let kind = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<RepoError>())
        .map(RepoError::kind);

    match kind {
        Some(ErrorKind::Usage) => 2,
        Some(ErrorKind::Conflict) => 3,
        Some(ErrorKind::NotFound) => 4,
        Some(ErrorKind::PartialTraversal) => 5,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if e
                .chain()
                .find_map(|cause| cause.downcast_ref::<RepoError>())
                .is_some_and(RepoError::is_retryable)
            {
                eprintln!("\nThis looks like a transient storage failure; retrying may succeed.");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    cli.command.execute(cli.schema).await
}
