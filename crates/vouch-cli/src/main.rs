//! vouch - operator CLI for the Vouch forensic ledger.
//!
//! Reads the event database directly for offline inspection and
//! verification; talks to the running daemon's admin surface for live
//! health and key rotation. Exits 0 on success and non-zero on any
//! verification failure or missing artifact.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

/// vouch - tamper-evident forensic ledger tool
#[derive(Parser, Debug)]
#[command(name = "vouch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the event database
    #[arg(long, default_value = "vouch.db")]
    db: PathBuf,

    /// Base URL of the daemon admin surface
    #[arg(long, default_value = "http://127.0.0.1:9998")]
    admin_url: String,

    /// Base URL of the intercepting proxy (used by replay)
    #[arg(long, default_value = "http://127.0.0.1:9999")]
    proxy_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the entire hash chain of the current run
    Verify {
        /// Skip querying the running daemon for live health
        #[arg(long)]
        skip_live: bool,
    },

    /// Show current run information
    Status,

    /// List recent events
    Events {
        /// Number of events to show
        #[arg(long, default_value = "10")]
        limit: u64,
    },

    /// Show detailed run and global statistics
    Stats,

    /// List all high-risk events
    Risk,

    /// Export the current run as an evidence bag (ZIP)
    Export {
        /// Output path, e.g. evidence.zip
        output: PathBuf,
    },

    /// Visualize the forensic timeline of a task
    Trace {
        /// Task id to trace
        task_id: String,
    },

    /// Re-execute a recorded tool call to reproduce an incident
    Replay {
        /// Event id to replay
        event_id: String,
    },

    /// Rotate the Ed25519 signing keys (begins a new run)
    Rekey,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Verify { skip_live } => commands::verify::run(&cli.db, &cli.admin_url, *skip_live),
        Commands::Status => commands::status::run(&cli.db),
        Commands::Events { limit } => commands::events::run(&cli.db, *limit),
        Commands::Stats => commands::stats::run(&cli.db),
        Commands::Risk => commands::risk::run(&cli.db),
        Commands::Export { output } => commands::export::run(&cli.db, output),
        Commands::Trace { task_id } => commands::trace::run(&cli.db, task_id),
        Commands::Replay { event_id } => commands::replay::run(&cli.db, &cli.proxy_url, event_id),
        Commands::Rekey => commands::rekey::run(&cli.admin_url),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        },
    }
}
