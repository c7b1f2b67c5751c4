//! Staging writers.
//!
//! Every upload is first written to a temporary file under the storage root,
//! whatever the final backend. The same chunk is fed to the digest and
//! counted before the next one is accepted, so the digest and size always
//! describe exactly the bytes on disk.

use crate::{ContentDigest, DigestAccumulator, TransferId, TransferRegistry};
use derive_getters::Getters;
use modelvault_error::{StorageError, StorageErrorKind, VaultResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Temp file for a transfer: `<root>/tmp_<transfer id>`.
///
/// Keyed by the transfer id so concurrent uploads of the same filename never
/// share a staging file.
pub fn staging_path(root: &Path, id: TransferId) -> PathBuf {
    root.join(format!("tmp_{}", id))
}

/// A fully written staging file with its digest and size.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct StagedFile {
    path: PathBuf,
    digest: ContentDigest,
    size: u64,
}

fn write_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::new(StorageErrorKind::FileWrite(format!(
        "{}: {}",
        path.display(),
        e
    )))
}

fn create_parent(path: &Path) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                parent.display(),
                e
            )))
        })?;
    }
    Ok(())
}

/// Async staging writer.
///
/// File writes go through `tokio::fs`, which runs them on the blocking pool,
/// so the caller keeps reading from its source while a write is in flight.
/// Digest and byte count are updated in the order chunks are handed in.
#[derive(Debug)]
pub struct StagingWriter {
    path: PathBuf,
    file: tokio::fs::File,
    digest: DigestAccumulator,
    registry: Arc<TransferRegistry>,
    id: TransferId,
}

impl StagingWriter {
    /// Create (or truncate) the staging file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub async fn create(
        path: impl Into<PathBuf>,
        registry: Arc<TransferRegistry>,
        id: TransferId,
    ) -> VaultResult<Self> {
        let path = path.into();
        create_parent(&path)?;
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| write_error(&path, e))?;

        tracing::debug!(transfer_id = %id, path = %path.display(), "Opened staging file");
        Ok(Self {
            path,
            file,
            digest: DigestAccumulator::new(),
            registry,
            id,
        })
    }

    /// Staging file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far.
    pub fn bytes(&self) -> u64 {
        self.digest.bytes()
    }

    /// Append one chunk.
    ///
    /// # Errors
    ///
    /// Returns `FileWrite` if the chunk cannot be written. The staging file is
    /// left in place for the caller to clean up.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> VaultResult<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| write_error(&self.path, e))?;
        self.digest.update(chunk);
        self.registry.record_progress(self.id, chunk.len() as u64);

        tracing::trace!(
            transfer_id = %self.id,
            chunk = chunk.len(),
            written = self.digest.bytes(),
            "Staged chunk"
        );
        Ok(())
    }

    /// Flush everything to disk and hand back the digest and size.
    ///
    /// # Errors
    ///
    /// Returns `FileWrite` if the final flush or sync fails.
    pub async fn finish(mut self) -> VaultResult<StagedFile> {
        self.file
            .flush()
            .await
            .map_err(|e| write_error(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| write_error(&self.path, e))?;

        let size = self.digest.bytes();
        Ok(StagedFile {
            path: self.path,
            digest: self.digest.finalize(),
            size,
        })
    }
}

/// Blocking staging writer for synchronous chunk sources.
///
/// Meant to run on a blocking thread (see
/// [`ArtifactStore::store_blocking`](crate::ArtifactStore::store_blocking)).
#[derive(Debug)]
pub struct BlockingStagingWriter {
    path: PathBuf,
    file: std::fs::File,
    digest: DigestAccumulator,
    registry: Arc<TransferRegistry>,
    id: TransferId,
}

impl BlockingStagingWriter {
    /// Create (or truncate) the staging file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub fn create(
        path: impl Into<PathBuf>,
        registry: Arc<TransferRegistry>,
        id: TransferId,
    ) -> VaultResult<Self> {
        let path = path.into();
        create_parent(&path)?;
        let file = std::fs::File::create(&path).map_err(|e| write_error(&path, e))?;

        tracing::debug!(transfer_id = %id, path = %path.display(), "Opened staging file");
        Ok(Self {
            path,
            file,
            digest: DigestAccumulator::new(),
            registry,
            id,
        })
    }

    /// Staging file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one chunk.
    ///
    /// # Errors
    ///
    /// Returns `FileWrite` if the chunk cannot be written.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> VaultResult<()> {
        self.file
            .write_all(chunk)
            .map_err(|e| write_error(&self.path, e))?;
        self.digest.update(chunk);
        self.registry.record_progress(self.id, chunk.len() as u64);
        Ok(())
    }

    /// Drain a chunk iterator to completion.
    ///
    /// # Errors
    ///
    /// Returns `StreamRead` if the source yields an error, or `FileWrite` if a
    /// write fails. Stops at the first error.
    pub fn write_all<I, B>(&mut self, chunks: I) -> VaultResult<()>
    where
        I: IntoIterator<Item = std::io::Result<B>>,
        B: AsRef<[u8]>,
    {
        for chunk in chunks {
            let chunk = chunk.map_err(|e| {
                StorageError::new(StorageErrorKind::StreamRead(e.to_string()))
            })?;
            self.write_chunk(chunk.as_ref())?;
        }
        Ok(())
    }

    /// Flush everything to disk and hand back the digest and size.
    ///
    /// # Errors
    ///
    /// Returns `FileWrite` if the final flush or sync fails.
    pub fn finish(mut self) -> VaultResult<StagedFile> {
        self.file.flush().map_err(|e| write_error(&self.path, e))?;
        self.file.sync_all().map_err(|e| write_error(&self.path, e))?;

        let size = self.digest.bytes();
        Ok(StagedFile {
            path: self.path,
            digest: self.digest.finalize(),
            size,
        })
    }
}
