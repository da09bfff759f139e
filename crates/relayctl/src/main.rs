//! relayctl: Command-line interface for an uplink relay database.
//!
//! Reads the relay's SQLite file directly, so it works whether or not the
//! relay is running.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uplink_relay::storage::{QueueOrdering, QueueStore, StatusStore, StorePool};

/// Command-line interface for an uplink relay database.
#[derive(Parser)]
#[command(name = "relayctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the relay's SQLite database
    #[arg(short, long, env = "UPLINK_DATABASE", default_value = "./data/relay.db")]
    database: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the uplink queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Inspect or register supervised targets
    Targets {
        #[command(subcommand)]
        action: TargetsAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show the number of records awaiting delivery
    Depth,
    /// List the oldest records awaiting delivery
    List {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TargetsAction {
    /// List targets and their last probe result
    List,
    /// Register a target (picked up on the next relay start)
    Add {
        /// Target name
        name: String,
        /// Liveness URL
        url: String,
    },
}

fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let pool = StorePool::open(&cli.database, 1)
        .with_context(|| format!("failed to open database: {}", cli.database.display()))?;

    match cli.command {
        Commands::Queue { action } => {
            let store = QueueStore::new(pool, QueueOrdering::Fifo);
            match action {
                QueueAction::Depth => commands::queue::depth(&store, cli.output)?,
                QueueAction::List { limit } => commands::queue::list(&store, limit, cli.output)?,
            }
        }
        Commands::Targets { action } => {
            let store = StatusStore::new(pool);
            match action {
                TargetsAction::List => commands::targets::list(&store, cli.output)?,
                TargetsAction::Add { name, url } => {
                    commands::targets::add(&store, &name, &url, cli.output)?;
                }
            }
        }
    }

    Ok(())
}
