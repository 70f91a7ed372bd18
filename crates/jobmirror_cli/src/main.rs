//! jobmirror CLI
//!
//! Command-line tools for jobmirror stores.
//!
//! # Commands
//!
//! - `inspect` - List mirrored jobs and their files
//! - `ping` - Check that the store answers
//! - `correct` - Run the exit-time status correction
//! - `mirror` - Mirror a simulated set of downloads into the store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// jobmirror command-line store tools.
#[derive(Parser)]
#[command(name = "jobmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(global = true, short, long)]
    db: Option<PathBuf>,

    /// Prefix of the mirror's table names
    #[arg(global = true, long, default_value = "")]
    prefix: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mirrored jobs
    Inspect {
        /// Include each job's files
        #[arg(long)]
        files: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that the store answers
    Ping,

    /// Replace transient statuses and zero live counters
    Correct,

    /// Mirror simulated downloads into the store
    Mirror {
        /// Number of simulated jobs
        #[arg(short, long, default_value = "10")]
        jobs: usize,

        /// Number of progress updates to send
        #[arg(short, long, default_value = "20")]
        ticks: u32,

        /// Milliseconds between progress updates
        #[arg(long, default_value = "250")]
        tick_ms: u64,

        /// Only mirror files with these extensions (comma separated)
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { files, format } => {
            let path = cli.db.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &cli.prefix, files, &format)?;
        }
        Commands::Ping => {
            let path = cli.db.ok_or("Database path required for ping")?;
            commands::ping::run(&path, &cli.prefix)?;
        }
        Commands::Correct => {
            let path = cli.db.ok_or("Database path required for correct")?;
            commands::correct::run(&path, &cli.prefix)?;
        }
        Commands::Mirror {
            jobs,
            ticks,
            tick_ms,
            extensions,
        } => {
            let path = cli.db.ok_or("Database path required for mirror")?;
            let options = commands::mirror::MirrorOptions {
                jobs,
                ticks,
                tick: std::time::Duration::from_millis(tick_ms),
                extensions,
            };
            commands::mirror::run(&path, &cli.prefix, options)?;
        }
        Commands::Version => {
            println!("jobmirror CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
