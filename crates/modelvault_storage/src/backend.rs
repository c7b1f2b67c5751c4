//! Final placement of staged uploads.
//!
//! Both backends address content by digest:
//!
//! ```text
//! local:   <root>/<sha256>/<filename>
//! object:  s3://<bucket>/<sha256>/<filename>
//! ```
//!
//! Identical bytes land in the same directory (or under the same key
//! prefix). Different filenames with the same digest are kept side by side;
//! the same digest and filename overwrite each other, last writer wins.

use crate::cleanup;
use crate::object::{DEFAULT_PART_SIZE, upload_file};
use crate::{ObjectStore, StagedFile, StorageLocator};
use modelvault_error::{StorageError, StorageErrorKind, VaultResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rename attempts before a vanished digest directory counts as a failure.
const PLACEMENT_ATTEMPTS: u32 = 8;

/// Reduce an untrusted filename to a single safe path component.
///
/// Directory parts are dropped, so `../../etc/passwd` becomes `passwd`.
///
/// # Errors
///
/// Returns `InvalidFilename` when nothing usable is left (empty, `.`, `..`).
pub fn sanitize_filename(filename: &str) -> Result<String, StorageError> {
    let last = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(StorageError::new(StorageErrorKind::InvalidFilename(
            filename.to_string(),
        )));
    }
    Ok(last.to_string())
}

/// Object key for an artifact: `<digest>/<filename>`.
pub fn object_key(digest: &str, filename: &str) -> String {
    format!("{}/{}", digest, filename)
}

/// Object-storage placement: a client and the bucket artifacts go to.
#[derive(Clone)]
pub struct ObjectBackend {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    part_size: u64,
}

impl ObjectBackend {
    /// Pair a client with a bucket, using [`DEFAULT_PART_SIZE`] parts.
    pub fn new(client: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Files larger than `part_size` are uploaded in parts of that size.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Multipart part size.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Target bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Underlying client.
    pub fn client(&self) -> &dyn ObjectStore {
        self.client.as_ref()
    }
}

impl std::fmt::Debug for ObjectBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBackend")
            .field("bucket", &self.bucket)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

/// Where finished uploads go. Chosen once at startup.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// Content-addressed directories under the storage root
    Local,
    /// Object storage bucket
    Object(ObjectBackend),
}

impl StorageBackend {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::Object(_) => "object",
        }
    }

    /// Move a staged file to its content-addressed home.
    ///
    /// `filename` must already be sanitized.
    ///
    /// # Errors
    ///
    /// Directory, bucket, upload or rename failures are returned as is. On
    /// failure the staged file is left in place.
    #[tracing::instrument(skip(self, root, staged), fields(backend = self.name(), digest = %staged.digest(), size = staged.size()))]
    pub async fn finalize(
        &self,
        root: &Path,
        staged: &StagedFile,
        filename: &str,
    ) -> VaultResult<StorageLocator> {
        match self {
            StorageBackend::Local => finalize_local(root, staged, filename).await,
            StorageBackend::Object(object) => finalize_object(object, staged, filename).await,
        }
    }
}

async fn finalize_local(
    root: &Path,
    staged: &StagedFile,
    filename: &str,
) -> VaultResult<StorageLocator> {
    let dir: PathBuf = root.join(staged.digest().as_str());
    let dest = dir.join(filename);

    let mut attempt = 1;
    loop {
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                dir.display(),
                e
            )))
        })?;

        let err = match tokio::fs::rename(staged.path(), &dest).await {
            Ok(()) => break,
            Err(e) => e,
        };

        // Digest directory pruned by a concurrent delete in between
        let vanished = err.kind() == std::io::ErrorKind::NotFound
            && attempt < PLACEMENT_ATTEMPTS
            && tokio::fs::try_exists(staged.path()).await.unwrap_or(false);
        if !vanished {
            return Err(StorageError::new(StorageErrorKind::Rename(format!(
                "{} to {}: {}",
                staged.path().display(),
                dest.display(),
                err
            )))
            .into());
        }

        tracing::debug!(attempt, dir = %dir.display(), "Digest directory vanished, retrying");
        attempt += 1;
    }

    tracing::info!(path = %dest.display(), "Stored artifact on local disk");
    Ok(StorageLocator::Local(dest))
}

async fn finalize_object(
    object: &ObjectBackend,
    staged: &StagedFile,
    filename: &str,
) -> VaultResult<StorageLocator> {
    let key = object_key(staged.digest().as_str(), filename);

    object.client.ensure_bucket(&object.bucket).await?;
    upload_file(
        object.client.as_ref(),
        &object.bucket,
        &key,
        staged.path(),
        *staged.size(),
        object.part_size,
    )
    .await?;

    // Best effort once the object exists
    cleanup::remove_file(staged.path()).await;

    tracing::info!(bucket = %object.bucket, key = %key, "Stored artifact in object storage");
    Ok(StorageLocator::object(object.bucket.clone(), key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("model.onnx").unwrap(), "model.onnx");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\models\\w.bin").unwrap(), "w.bin");
        assert_eq!(sanitize_filename("with space.bin").unwrap(), "with space.bin");

        for bad in ["", "   ", ".", "..", "dir/", "a/..", "bad\0name"] {
            let err = sanitize_filename(bad).unwrap_err();
            assert!(
                matches!(err.kind, StorageErrorKind::InvalidFilename(_)),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("abc", "m.bin"), "abc/m.bin");
    }
}
