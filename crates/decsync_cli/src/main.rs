//! DecSync CLI
//!
//! Read-only inspection tools for a DecSync directory.
//!
//! # Commands
//!
//! - `check` - Validate (or create) the `.decsync-info` version gate
//! - `collections` - List the collections of a sync type
//! - `info` - Print the merged static info of a collection
//! - `apps` - List the applications seen in a collection

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DecSync directory inspection tools.
#[derive(Parser)]
#[command(name = "decsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the DecSync directory (defaults to $DECSYNC_DIR or the
    /// XDG data directory)
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the .decsync-info version gate, creating it if absent
    Check,

    /// List the collections of a sync type
    Collections {
        /// The sync type, for example "contacts" or "calendars"
        #[arg(short, long)]
        sync_type: String,
    },

    /// Print the merged static info of a collection
    Info {
        /// The sync type, for example "rss" or "contacts"
        #[arg(short, long)]
        sync_type: String,

        /// Optional collection identifier
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// List the applications seen in a collection
    Apps {
        /// The sync type, for example "rss" or "contacts"
        #[arg(short, long)]
        sync_type: String,

        /// Optional collection identifier
        #[arg(short, long)]
        collection: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dir = cli.dir.unwrap_or_else(decsync_core::get_default_dir);

    match cli.command {
        Commands::Check => commands::check::run(&dir)?,
        Commands::Collections { sync_type } => commands::collections::run(&dir, &sync_type)?,
        Commands::Info {
            sync_type,
            collection,
        } => commands::info::run(&dir, &sync_type, collection.as_deref())?,
        Commands::Apps {
            sync_type,
            collection,
            format,
        } => commands::apps::run(&dir, &sync_type, collection.as_deref(), &format)?,
    }

    Ok(())
}
