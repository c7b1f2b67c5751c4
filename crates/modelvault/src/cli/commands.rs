//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Modelvault - content-addressed storage for model artifacts
#[derive(Parser, Debug)]
#[command(name = "modelvault")]
#[command(about = "Content-addressed storage for model artifacts", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./modelvault.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a file and print its record
    Put {
        /// File to upload
        path: PathBuf,

        /// Filename to store under (defaults to the file's own name)
        #[arg(long)]
        name: Option<String>,

        /// MIME type to record
        #[arg(long)]
        mime: Option<String>,
    },

    /// Delete the bytes behind a storage locator
    Rm {
        /// Locator as printed by `put`
        locator: String,
    },

    /// Show how a storage locator would be served
    Resolve {
        /// Locator as printed by `put`
        locator: String,
    },
}
