//! The artifact store: the interface the metadata layer calls.

use crate::backend::{ObjectBackend, StorageBackend, sanitize_filename};
use crate::cleanup::{self, Cleanup};
use crate::staging::{BlockingStagingWriter, StagedFile, StagingWriter, staging_path};
use crate::{
    BackendSelection, ContentDigest, S3ObjectStore, StorageLocator, StorageSettings,
    TrafficSnapshot, TransferId, TransferRegistry,
};
use bytes::Bytes;
use derive_getters::Getters;
use futures::{Stream, StreamExt};
use modelvault_error::{StorageError, StorageErrorKind, VaultResult};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

/// Read size used when pulling from an async reader: 1 MiB.
pub const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Lifetime of presigned download URLs.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// MIME type recorded when the caller gives none.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct StoredArtifact {
    locator: StorageLocator,
    digest: ContentDigest,
    size: u64,
    filename: String,
}

/// File record fields produced by the store, ready for the metadata layer.
///
/// Only buildable from a [`StoredArtifact`], so `size` and `sha256` always
/// come from the bytes actually written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
pub struct ArtifactRecord {
    filename: String,
    size: u64,
    sha256: ContentDigest,
    storage_locator: String,
    mime: String,
}

impl ArtifactRecord {
    /// Combine a stored artifact with the caller's MIME type.
    pub fn new(stored: StoredArtifact, mime: Option<&str>) -> Self {
        let mime = mime
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME)
            .to_string();

        Self {
            storage_locator: stored.locator.encode(),
            filename: stored.filename,
            size: stored.size,
            sha256: stored.digest,
            mime,
        }
    }
}

/// How a download should be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// Stream this local file
    LocalFile(PathBuf),
    /// Redirect the client to a presigned URL
    Redirect(String),
}

/// Unregisters a transfer and removes its staging file when dropped.
///
/// Armed from registration until the transfer is placed or released.
#[derive(Debug)]
struct TransferGuard {
    registry: Arc<TransferRegistry>,
    id: TransferId,
    staging: PathBuf,
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl TransferGuard {
    fn new(registry: Arc<TransferRegistry>, id: TransferId, staging: PathBuf) -> Self {
        Self {
            registry,
            id,
            staging,
            cancelled: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    /// Flag raised when the guard fires; checked by blocking writers.
    fn cancelled(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Unregister and remove the staging file now.
    async fn release(mut self) -> Cleanup {
        self.registry.remove(self.id);
        let outcome = cleanup::remove_file(&self.staging).await;
        self.armed = false;
        outcome
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.registry.remove(self.id);

        let id = self.id;
        let staging = std::mem::take(&mut self.staging);
        let remove = move || {
            let outcome = cleanup::remove_file_blocking(&staging);
            tracing::debug!(transfer_id = %id, outcome = %outcome, "Cleaned up abandoned upload");
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

/// Content-addressed artifact storage.
///
/// Cheap to clone; clones share the backend and the transfer registry.
///
/// # Example
///
/// ```no_run
/// use modelvault_storage::{ArtifactStore, TransferRegistry};
/// use std::sync::Arc;
///
/// # async fn example() -> modelvault_error::VaultResult<()> {
/// let store = ArtifactStore::local("/var/lib/modelvault", Arc::new(TransferRegistry::new()))?;
///
/// let mut upload = store.begin_upload("weights.bin", Some(11)).await?;
/// upload.write_chunk(b"hello ").await?;
/// upload.write_chunk(b"world").await?;
/// let stored = upload.complete().await?;
///
/// println!("{} {} {}", stored.locator(), stored.digest(), stored.size());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    backend: StorageBackend,
    registry: Arc<TransferRegistry>,
    // Local placement holds it shared, digest directory pruning exclusively
    placement: Arc<RwLock<()>>,
}

impl ArtifactStore {
    /// Store over an explicit backend.
    ///
    /// Creates the storage root if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryCreation` if the root cannot be created.
    pub fn new(
        root: impl Into<PathBuf>,
        backend: StorageBackend,
        registry: Arc<TransferRegistry>,
    ) -> VaultResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                root.display(),
                e
            )))
        })?;

        tracing::info!(root = %root.display(), backend = backend.name(), "Created artifact store");
        Ok(Self {
            root,
            backend,
            registry,
            placement: Arc::new(RwLock::new(())),
        })
    }

    /// Store that keeps artifacts on local disk under `root`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryCreation` if the root cannot be created.
    pub fn local(root: impl Into<PathBuf>, registry: Arc<TransferRegistry>) -> VaultResult<Self> {
        Self::new(root, StorageBackend::Local, registry)
    }

    /// Store configured from settings, connecting to object storage if selected.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryCreation` if the storage root cannot be created.
    pub async fn from_settings(
        settings: &StorageSettings,
        registry: Arc<TransferRegistry>,
    ) -> VaultResult<Self> {
        let backend = match settings.backend_selection() {
            BackendSelection::Local => StorageBackend::Local,
            BackendSelection::Object(object) => {
                let client = S3ObjectStore::connect(&object).await;
                StorageBackend::Object(ObjectBackend::new(Arc::new(client), object.bucket()))
            }
        };
        Self::new(settings.storage_dir(), backend, registry)
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Selected backend.
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// Shared transfer registry.
    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    fn register(&self, filename: &str, total_bytes: Option<u64>) -> TransferGuard {
        let id = self.registry.register(filename, total_bytes);
        TransferGuard::new(self.registry.clone(), id, staging_path(&self.root, id))
    }

    /// Start an upload and register it for telemetry.
    ///
    /// `total_bytes` is the declared size, if the caller knows it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilename` for an unusable filename, or an I/O error if
    /// the staging file cannot be created.
    #[tracing::instrument(skip(self))]
    pub async fn begin_upload(&self, filename: &str, total_bytes: Option<u64>) -> VaultResult<Upload> {
        let filename = sanitize_filename(filename)?;
        let guard = self.register(&filename, total_bytes);

        let writer =
            StagingWriter::create(guard.staging.clone(), self.registry.clone(), guard.id).await?;

        tracing::info!(transfer_id = %guard.id, filename = %filename, "Upload started");
        Ok(Upload {
            filename,
            writer: Some(writer),
            failed: false,
            guard,
            store: self.clone(),
        })
    }

    /// Upload everything a stream yields.
    ///
    /// A stream error aborts the transfer and is returned as `StreamRead`.
    ///
    /// # Errors
    ///
    /// Any staging, stream or finalize error.
    pub async fn store_stream<S, B>(
        &self,
        filename: &str,
        total_bytes: Option<u64>,
        stream: S,
    ) -> VaultResult<StoredArtifact>
    where
        S: Stream<Item = std::io::Result<B>>,
        B: AsRef<[u8]>,
    {
        let mut upload = self.begin_upload(filename, total_bytes).await?;
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => upload.write_chunk(chunk.as_ref()).await?,
                Err(e) => {
                    tracing::warn!(transfer_id = %upload.id(), error = %e, "Upload stream failed");
                    upload.abort().await;
                    return Err(StorageError::new(StorageErrorKind::StreamRead(e.to_string())).into());
                }
            }
        }

        upload.complete().await
    }

    /// Upload everything an async reader yields, reading 1 MiB at a time.
    ///
    /// # Errors
    ///
    /// Any staging, read or finalize error.
    pub async fn store_reader<R>(
        &self,
        filename: &str,
        total_bytes: Option<u64>,
        reader: R,
    ) -> VaultResult<StoredArtifact>
    where
        R: AsyncRead + Send,
    {
        let stream = futures::stream::unfold(
            Box::pin(reader),
            |mut reader| async move {
                let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
                match (&mut reader).take(READ_CHUNK_SIZE as u64).read_to_end(&mut buf).await {
                    Ok(0) => None,
                    Ok(_) => Some((Ok(Bytes::from(buf)), reader)),
                    Err(e) => Some((Err(e), reader)),
                }
            },
        );
        self.store_stream(filename, total_bytes, stream).await
    }

    /// Upload from a blocking chunk iterator.
    ///
    /// The iterator is drained on tokio's blocking pool; finalization runs on
    /// the calling task. If the returned future is dropped early, the
    /// transfer is unregistered at once and the blocking writer stops at the
    /// next chunk and removes its staging file.
    ///
    /// # Errors
    ///
    /// Any staging, iterator or finalize error.
    #[tracing::instrument(skip(self, chunks))]
    pub async fn store_blocking<I, B>(
        &self,
        filename: &str,
        total_bytes: Option<u64>,
        chunks: I,
    ) -> VaultResult<StoredArtifact>
    where
        I: IntoIterator<Item = std::io::Result<B>> + Send + 'static,
        B: AsRef<[u8]>,
    {
        let filename = sanitize_filename(filename)?;
        let guard = self.register(&filename, total_bytes);
        let id = guard.id;

        let registry = self.registry.clone();
        let staging = guard.staging.clone();
        let cancelled = guard.cancelled();
        let task = tokio::task::spawn_blocking(move || {
            let staged = (|| -> VaultResult<StagedFile> {
                let mut writer = BlockingStagingWriter::create(staging.clone(), registry, id)?;
                writer.write_all(
                    chunks
                        .into_iter()
                        .take_while(|_| !cancelled.load(Ordering::SeqCst)),
                )?;
                writer.finish()
            })();

            // Nobody is waiting for this file any more
            if cancelled.load(Ordering::SeqCst) {
                cleanup::remove_file_blocking(&staging);
                return Err(StorageError::new(StorageErrorKind::StreamRead(format!(
                    "upload {} cancelled",
                    id
                )))
                .into());
            }
            staged
        });

        let staged = match task.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                "staging task for {}: {}",
                id, e
            )))
            .into()),
        };

        match staged {
            Ok(staged) => self.finish(guard, &filename, staged).await,
            Err(e) => {
                guard.release().await;
                Err(e)
            }
        }
    }

    async fn finish(
        &self,
        guard: TransferGuard,
        filename: &str,
        staged: StagedFile,
    ) -> VaultResult<StoredArtifact> {
        let id = guard.id;
        let result = match self.backend {
            StorageBackend::Local => {
                let _placing = self.placement.read().await;
                self.backend.finalize(&self.root, &staged, filename).await
            }
            StorageBackend::Object(_) => self.backend.finalize(&self.root, &staged, filename).await,
        };

        match result {
            Ok(locator) => {
                self.registry.remove(id);
                guard.disarm();
                tracing::info!(
                    transfer_id = %id,
                    locator = %locator,
                    digest = %staged.digest(),
                    size = staged.size(),
                    "Upload complete"
                );
                Ok(StoredArtifact {
                    locator,
                    digest: staged.digest().clone(),
                    size: *staged.size(),
                    filename: filename.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(transfer_id = %id, error = %e, "Finalize failed");
                guard.release().await;
                Err(e)
            }
        }
    }

    /// Local locator path, if it lies inside the storage root.
    fn contained<'a>(&self, locator: &StorageLocator, path: &'a Path) -> VaultResult<&'a Path> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) || path == self.root {
            return Err(StorageError::new(StorageErrorKind::MalformedLocator(format!(
                "{} is outside the storage root {}",
                locator,
                self.root.display()
            )))
            .into());
        }
        Ok(path)
    }

    /// Remove an artifact's bytes.
    ///
    /// Idempotent: bytes that are already gone count as deleted. After a
    /// local delete the digest directory is removed if it became empty.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLocator` for a local path outside the storage root,
    /// `FileWrite` if a local file exists but cannot be removed, or
    /// `BackendUnavailable` if the object store fails or is not configured.
    #[tracing::instrument(skip(self, locator), fields(locator = %locator))]
    pub async fn delete_artifact(&self, locator: &StorageLocator) -> VaultResult<()> {
        match locator {
            StorageLocator::Local(path) => {
                let path = self.contained(locator, path)?;
                match tokio::fs::remove_file(path).await {
                    Ok(()) => tracing::info!("Deleted artifact"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!("Artifact already gone");
                    }
                    Err(e) => {
                        return Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                            "delete {}: {}",
                            path.display(),
                            e
                        )))
                        .into());
                    }
                }

                if let Some(parent) = path.parent().filter(|p| *p != self.root) {
                    let _pruning = self.placement.write().await;
                    cleanup::remove_dir_if_empty(parent).await;
                }
                Ok(())
            }
            StorageLocator::Object { bucket, key } => {
                if key.is_empty() {
                    tracing::debug!("Locator names no object, nothing to delete");
                    return Ok(());
                }
                let object = self.object_backend()?;
                object.client().delete_object(bucket, key).await?;
                tracing::info!("Deleted artifact");
                Ok(())
            }
        }
    }

    /// Work out how to serve an artifact.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing local file or an object locator with
    /// an empty key, `MalformedLocator` for a local path outside the storage
    /// root, and `BackendUnavailable` if presigning fails.
    #[tracing::instrument(skip(self, locator), fields(locator = %locator))]
    pub async fn resolve_download(&self, locator: &StorageLocator) -> VaultResult<DownloadTarget> {
        match locator {
            StorageLocator::Local(path) => {
                let path = self.contained(locator, path)?;
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    Ok(DownloadTarget::LocalFile(path.to_path_buf()))
                } else {
                    Err(StorageError::new(StorageErrorKind::NotFound(locator.encode())).into())
                }
            }
            StorageLocator::Object { bucket, key } => {
                if key.is_empty() {
                    return Err(StorageError::new(StorageErrorKind::NotFound(locator.encode())).into());
                }
                let object = self.object_backend()?;
                let url = object.client().presign_get(bucket, key, DOWNLOAD_URL_TTL).await?;
                Ok(DownloadTarget::Redirect(url))
            }
        }
    }

    /// Telemetry view of in-flight uploads.
    pub fn snapshot_active_transfers(&self) -> TrafficSnapshot {
        self.registry.snapshot()
    }

    fn object_backend(&self) -> VaultResult<&ObjectBackend> {
        match &self.backend {
            StorageBackend::Object(object) => Ok(object),
            StorageBackend::Local => Err(StorageError::new(StorageErrorKind::BackendUnavailable(
                "object storage is not configured".to_string(),
            ))
            .into()),
        }
    }
}

/// One in-flight upload.
///
/// Chunks are written in call order. Dropping an unfinished upload (for
/// example when the request future is cancelled, even midway through
/// [`complete`](Self::complete)) unregisters it and removes its staging file.
#[derive(Debug)]
pub struct Upload {
    filename: String,
    writer: Option<StagingWriter>,
    failed: bool,
    guard: TransferGuard,
    store: ArtifactStore,
}

impl Upload {
    /// Transfer id, as listed in traffic snapshots.
    pub fn id(&self) -> TransferId {
        self.guard.id
    }

    /// Sanitized filename the artifact will be stored under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.writer.as_ref().map(StagingWriter::bytes).unwrap_or(0)
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns `FileWrite` if the write fails. The transfer is unregistered
    /// and refuses further chunks; the staging file stays until
    /// [`abort`](Self::abort) or drop.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> VaultResult<()> {
        let id = self.guard.id;
        let writer = match self.writer.as_mut() {
            Some(writer) if !self.failed => writer,
            _ => {
                return Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                    "upload {} is no longer writable",
                    id
                )))
                .into());
            }
        };

        if let Err(e) = writer.write_chunk(chunk).await {
            tracing::warn!(transfer_id = %id, error = %e, "Chunk write failed");
            self.failed = true;
            self.store.registry.remove(id);
            return Err(e);
        }
        Ok(())
    }

    /// Finish staging and move the artifact to its final place.
    ///
    /// # Errors
    ///
    /// Returns the staging or finalize error; no artifact exists afterwards.
    #[tracing::instrument(skip(self), fields(transfer_id = %self.guard.id, filename = %self.filename))]
    pub async fn complete(self) -> VaultResult<StoredArtifact> {
        let Upload {
            filename,
            writer,
            failed,
            guard,
            store,
        } = self;

        let writer = match writer {
            Some(writer) if !failed => writer,
            _ => {
                return Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                    "upload {} failed and cannot be completed",
                    guard.id
                )))
                .into());
            }
        };

        let staged = match writer.finish().await {
            Ok(staged) => staged,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        store.finish(guard, &filename, staged).await
    }

    /// Give up on the upload, removing its staging file on a best-effort basis.
    #[tracing::instrument(skip(self), fields(transfer_id = %self.guard.id))]
    pub async fn abort(self) -> Cleanup {
        let Upload { writer, guard, .. } = self;
        drop(writer);

        let outcome = guard.release().await;
        tracing::info!(outcome = %outcome, "Upload aborted");
        outcome
    }
}
