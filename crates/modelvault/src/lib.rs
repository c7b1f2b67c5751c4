//! Modelvault - content-addressed artifact storage
//!
//! Stores model weights, checkpoints and other large binaries by their
//! SHA-256 digest, on local disk or in an S3-compatible bucket, while
//! streaming them in without holding a whole file in memory.
//!
//! # Architecture
//!
//! - `modelvault_error` - Error types
//! - `modelvault_storage` - Streaming uploads, placement backends and the transfer registry
//!
//! This crate (`modelvault`) re-exports both and ships the `modelvault` binary.

pub use modelvault_error::*;
pub use modelvault_storage::*;
