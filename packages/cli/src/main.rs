#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for stock sync.
//!
//! Reads a CSV or DBF export, matches it against the shop catalog, and
//! applies price and stock changes. Running without a subcommand opens an
//! interactive menu.
//!
//! Uses `indicatif-log-bridge` (via [`stock_sync_cli_utils::init_logger`])
//! so that log lines and progress bars never fight for the terminal.

mod commands;
mod config;
mod interactive;
mod report;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{App, SyncOptions};

#[derive(Parser)]
#[command(
    name = "stock_sync",
    about = "Sync product prices and stock levels from a spreadsheet export"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the headers and first rows of a source file
    Preview {
        /// CSV or DBF file to read
        file: PathBuf,
        /// Number of data rows to show
        #[arg(long, default_value = "10")]
        rows: usize,
    },
    /// Plan a sync, show it, and apply it after confirmation
    Sync {
        /// Source file (defaults to `sync.source_path`)
        file: Option<PathBuf>,
        /// Only plan; never write to the shop
        #[arg(long)]
        dry_run: bool,
        /// Apply without asking for confirmation
        #[arg(long)]
        yes: bool,
        /// Also match rows with an empty SKU by product name
        #[arg(long)]
        full_chain: bool,
    },
    /// Write a single planned inventory update to check the connection
    SmokeTest {
        /// Source file (defaults to `sync.source_path`)
        file: Option<PathBuf>,
        /// Run without asking for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Sync on a fixed interval until interrupted
    Schedule {
        /// Source file (defaults to `sync.source_path`)
        file: Option<PathBuf>,
        /// Minutes between runs (defaults to `schedule.interval_minutes`)
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
    /// List the shop's inventory locations
    Locations,
    /// Show recent runs
    History {
        /// Delete all recorded runs
        #[arg(long)]
        clear: bool,
    },
    /// Check the configuration and column mapping without contacting the shop
    Validate {
        /// Source file (defaults to `sync.source_path`)
        file: Option<PathBuf>,
        /// Also require a full-length admin API token
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = stock_sync_cli_utils::init_logger();
    let cli = Cli::parse();
    let app = App::load(cli.config, multi)?;

    let Some(command) = cli.command else {
        println!("Stock Sync");
        println!();
        return interactive::run(&app).await;
    };

    match command {
        Commands::Preview { file, rows } => commands::preview(&file, rows)?,
        Commands::Sync {
            file,
            dry_run,
            yes,
            full_chain,
        } => {
            let options = SyncOptions {
                dry_run,
                yes,
                full_chain,
            };
            commands::sync(&app, file.as_deref(), options).await?;
        }
        Commands::SmokeTest { file, yes } => {
            commands::smoke_test(&app, file.as_deref(), yes).await?;
        }
        Commands::Schedule {
            file,
            interval_minutes,
        } => commands::schedule(&app, file.as_deref(), interval_minutes).await?,
        Commands::Locations => commands::locations(&app).await?,
        Commands::History { clear } => commands::history(&app, clear)?,
        Commands::Validate { file, strict } => {
            commands::validate(&app, file.as_deref(), strict)?;
        }
    }

    Ok(())
}
