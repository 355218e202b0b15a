//! crmsync CLI
//!
//! Command-line harness for the contact sync engine. The local store and
//! the CRM are stood in for by JSON snapshot files.
//!
//! # Commands
//!
//! - `reconcile` - Run one reconciliation pass over two snapshots
//! - `inspect` - Display sync state rebuilt from a local snapshot

mod commands;
mod snapshot;

use clap::{Parser, Subcommand};
use commands::reconcile::ReconcileOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Contact sync between a local store snapshot and a CRM snapshot.
#[derive(Parser)]
#[command(name = "crmsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store snapshot
    #[arg(global = true, short, long)]
    local: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass and write both snapshots back
    Reconcile {
        /// Path to the CRM snapshot
        #[arg(short, long)]
        remote: PathBuf,

        /// CRM user whose records are synchronized
        #[arg(short, long)]
        user: Option<String>,

        /// Records requested per listing page
        #[arg(long, default_value = "20")]
        page_size: u32,

        /// Dry run - report without writing the snapshots
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display sync state rebuilt from the local snapshot
    Inspect {
        /// Show per-item state
        #[arg(short, long)]
        items: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Reconcile {
            remote,
            user,
            page_size,
            dry_run,
            format,
        } => {
            let local = cli.local.ok_or("Local snapshot path required for reconcile")?;
            let options = ReconcileOptions {
                user,
                page_size,
                dry_run,
            };
            commands::reconcile::run(&remote, &local, &options, &format)?;
        }
        Commands::Inspect { items, format } => {
            let local = cli.local.ok_or("Local snapshot path required for inspect")?;
            commands::inspect::run(&local, items, &format)?;
        }
        Commands::Version => {
            println!("crmsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
