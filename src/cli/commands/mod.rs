//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod ingest;
mod lookup;
mod serve;
mod standalone;
mod update;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use querybroker::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "qbroker")]
#[command(about = "Request-coalescing query broker")]
#[command(version)]
pub struct Cli {
    /// Config file path (also QBROKER_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (POST /query)
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: 127.0.0.1:5000)
        #[arg(default_value = "127.0.0.1:5000")]
        bind: String,
    },

    /// Consume the request queue and coalesce requests
    Ingest,

    /// Consume progress events and update request records
    Update,

    /// Run gateway, ingester and updater in one process on an in-memory broker
    Standalone {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default: 127.0.0.1:5000)
        #[arg(default_value = "127.0.0.1:5000")]
        bind: String,
    },

    /// Show the stored record for a request hash
    Lookup {
        /// Request hash
        hash: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the hash a request file would be stored under
    Hash {
        /// File containing the request JSON
        file: PathBuf,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
    };
    let settings = load_settings_with_options(&options)?;

    match cli.command {
        Commands::Serve { bind } => serve::cmd_serve(&settings, &bind).await,
        Commands::Ingest => ingest::cmd_ingest(&settings).await,
        Commands::Update => update::cmd_update(&settings).await,
        Commands::Standalone { bind } => standalone::cmd_standalone(&settings, &bind).await,
        Commands::Lookup { hash, json } => lookup::cmd_lookup(&settings, &hash, json).await,
        Commands::Hash { file } => lookup::cmd_hash(&file),
    }
}
