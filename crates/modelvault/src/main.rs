//! Modelvault CLI binary.
//!
//! - Store a file by content digest
//! - Delete stored bytes by locator
//! - Resolve a locator to a servable path or presigned URL
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use cli::{Cli, Commands, delete_artifact, open_store, put_artifact, resolve_artifact};

    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // RUST_LOG wins unless --verbose was given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let store = open_store(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Put { path, name, mime } => {
            put_artifact(&store, &path, name.as_deref(), mime.as_deref()).await?;
        }

        Commands::Rm { locator } => {
            delete_artifact(&store, &locator).await?;
        }

        Commands::Resolve { locator } => {
            resolve_artifact(&store, &locator).await?;
        }
    }

    Ok(())
}
