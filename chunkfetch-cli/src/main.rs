//! chunkfetch CLI - Command-line interface
//!
//! This binary provides a command-line interface to the chunkfetch library.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use chunkfetch::config::{config_file_path, ConfigFile};
use chunkfetch::logging::init_logging;

use commands::common::LocatorArgs;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "chunkfetch", version, about = "Chunked, prioritised downloads of remote media objects")]
struct Cli {
    /// Configuration file (defaults to the per-user config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `chunkfetch=trace` (RUST_LOG wins if set)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download one object
    Fetch(FetchArgs),

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the local cache key of an object
    CacheKey(LocatorArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(config_file_path);

    match cli.command {
        Commands::Init { force } => commands::init::run(&config_path, force),
        Commands::CacheKey(args) => {
            let config = ConfigFile::load_from(&config_path)?;
            commands::cache_key::run(&args, &config)
        }
        Commands::Fetch(args) => {
            let config = ConfigFile::load_from(&config_path)?;
            let mut logging = config.logging.clone();
            if let Some(filter) = cli.log {
                logging = logging.with_filter(filter);
            }
            let _guard = init_logging(&logging);
            commands::fetch::run(args, &config).await
        }
    }
}
