//! Command-line interface module.
//!
//! This module provides the CLI structure and command handlers for the modelvault binary.

mod artifact;
mod commands;

pub use artifact::{delete_artifact, open_store, put_artifact, resolve_artifact};
pub use commands::{Cli, Commands};
