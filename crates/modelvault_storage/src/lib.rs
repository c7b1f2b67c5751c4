//! Content-addressed streaming artifact storage for modelvault.
//!
//! Uploads of any size are streamed to a staging file while a SHA-256 digest
//! is computed chunk by chunk. Once the stream ends, the file is placed under
//! a path derived from its digest, either on local disk or in an
//! S3-compatible bucket, and the caller gets back a locator, the digest and
//! the size to persist as metadata.
//!
//! # Features
//!
//! - **Streaming**: uploads are never buffered whole in memory
//! - **Content-addressed**: `<sha256>/<filename>` on disk or as object key
//! - **Atomic placement**: staging file + rename on local disk
//! - **Telemetry**: a shared [`TransferRegistry`] lists in-flight uploads
//!
//! # Example
//!
//! ```rust,no_run
//! use modelvault_storage::{ArtifactRecord, ArtifactStore, StorageSettings, TransferRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> modelvault_error::VaultResult<()> {
//! let settings = StorageSettings::load()?;
//! let registry = Arc::new(TransferRegistry::new());
//! let store = ArtifactStore::from_settings(&settings, registry).await?;
//!
//! let file = tokio::fs::File::open("model.safetensors").await.unwrap();
//! let stored = store.store_reader("model.safetensors", None, file).await?;
//! let record = ArtifactRecord::new(stored, Some("application/octet-stream"));
//! println!("{} -> {}", record.sha256(), record.storage_locator());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod cleanup;
mod digest;
mod locator;
mod object;
mod registry;
mod settings;
mod staging;
mod store;

pub use backend::{ObjectBackend, StorageBackend, object_key, sanitize_filename};
pub use cleanup::Cleanup;
pub use digest::{ContentDigest, DIGEST_HEX_LEN, DigestAccumulator, sha256_hex};
pub use locator::{OBJECT_SCHEME, StorageLocator};
pub use modelvault_error::{StorageError, StorageErrorKind};
pub use object::{
    DEFAULT_PART_SIZE, MAX_PARTS, ObjectStore, PartRange, S3ObjectStore, UploadedPart,
    plan_parts, upload_file,
};
pub use registry::{
    DEFAULT_CAPACITY, SNAPSHOT_LIMIT, TrafficSnapshot, TransferEntry, TransferId,
    TransferRegistry, TransferView,
};
pub use settings::{BackendSelection, ObjectStoreSettings, SETTINGS_FILE, StorageSettings};
pub use staging::{BlockingStagingWriter, StagedFile, StagingWriter, staging_path};
pub use store::{
    ArtifactRecord, ArtifactStore, DEFAULT_MIME, DOWNLOAD_URL_TTL, DownloadTarget,
    READ_CHUNK_SIZE, StoredArtifact, Upload,
};
