//! Error types for the modelvault artifact registry.
//!
//! # Error Hierarchy
//!
//! Errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - Constructors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use modelvault_error::{StorageError, StorageErrorKind, VaultResult};
//!
//! fn locate() -> VaultResult<String> {
//!     Err(StorageError::new(StorageErrorKind::NotFound("abc/model.bin".into())))?
//! }
//!
//! match locate() {
//!     Ok(path) => println!("Found: {}", path),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod json;
mod storage;

pub use config::{ConfigError, ConfigErrorKind};
pub use error::{VaultError, VaultErrorKind, VaultResult};
pub use json::JsonError;
pub use storage::{StorageError, StorageErrorKind};
