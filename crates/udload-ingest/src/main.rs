//! UDLoad Ingest - working directory to report tables

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use udload_common::logging::{init_logging, LogConfig, LogLevel};
use udload_ingest::config::AppConfig;
use udload_ingest::db;
use udload_ingest::pipeline::Pipeline;
use udload_ingest::run_log::LogEntry;

#[derive(Parser, Debug)]
#[command(name = "udload-ingest")]
#[command(author, version, about = "Load uploaded report bundles into the database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to UDLOAD_CONFIG or ./Configure.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a working directory end to end
    Run {
        /// Directory holding the uploaded files
        working_dir: PathBuf,

        /// Echo run-log entries to stderr as they happen
        #[arg(long)]
        follow: bool,
    },

    /// Run only the report script
    Script,

    /// Check that the database is reachable
    CheckDb,

    /// List destination tables and their row counts
    Tables,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("udload-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    match execute(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            process::exit(1);
        },
    }
}

/// Run the command; the returned code becomes the exit status
async fn execute(cli: Cli) -> Result<i32> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            working_dir,
            follow,
        } => {
            let mut pipeline = Pipeline::new(config)?;
            if follow {
                pipeline = pipeline.with_observer(std::sync::Arc::new(|entry: &LogEntry| {
                    eprintln!("{entry}");
                }));
            }

            let result = pipeline.run(&working_dir).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success { 0 } else { 1 })
        },
        Command::Script => {
            let pipeline = Pipeline::new(config)?;
            match pipeline.run_script().await? {
                Some(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(if report.failed() == 0 { 0 } else { 1 })
                },
                None => {
                    info!("No report script to run");
                    Ok(0)
                },
            }
        },
        Command::CheckDb => {
            db::test_connection(&config.database).await?;
            println!(
                "Connected to {}:{}/{}",
                config.database.host, config.database.port, config.database.dbname
            );
            Ok(0)
        },
        Command::Tables => {
            let mut conn = db::connect(&config.database).await?;
            let tables = db::list_tables(&mut conn).await?;
            println!("{}", serde_json::to_string_pretty(&tables)?);
            Ok(0)
        },
    }
}
