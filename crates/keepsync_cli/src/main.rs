//! keepsync CLI
//!
//! Command-line tools for keepsync offline stores.
//!
//! # Commands
//!
//! - `inspect` - Display mirrored entity types, counts and watermarks
//! - `queue` - List queued operations awaiting replay
//! - `clear` - Drop mirrored documents
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// keepsync offline store tools.
#[derive(Parser)]
#[command(name = "keepsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mirrored entity types, counts and watermarks
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations awaiting replay
    Queue {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop mirrored documents
    Clear {
        /// Entity type to clear
        #[arg(short = 't', long = "type", conflicts_with = "all")]
        entity_type: Option<String>,

        /// Clear every document, queued operation and watermark
        #[arg(short, long)]
        all: bool,
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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Storage path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Queue { limit, format } => {
            let path = cli.path.ok_or("Storage path required for queue")?;
            commands::queue::run(&path, limit, &format)?;
        }
        Commands::Clear { entity_type, all } => {
            let path = cli.path.ok_or("Storage path required for clear")?;
            let target = match (entity_type, all) {
                (_, true) => commands::clear::Target::All,
                (Some(name), false) => commands::clear::Target::Type(name),
                (None, false) => return Err("Specify --type <name> or --all".into()),
            };
            commands::clear::run(&path, &target)?;
        }
        Commands::Version => {
            println!("keepsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
