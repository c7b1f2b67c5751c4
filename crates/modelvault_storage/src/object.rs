//! Object-storage client abstraction and the S3 implementation.
//!
//! Files up to one part in size go up in a single `PutObject`. Larger files
//! use a multipart upload, since a single PUT is capped at 5 GiB:
//!
//! ```text
//! create_multipart_upload -> upload_part 1..=N (in order) -> complete_multipart_upload
//!                                    \-- any error --> abort_multipart_upload
//! ```

use crate::ObjectStoreSettings;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use derive_getters::Getters;
use modelvault_error::{StorageError, StorageErrorKind, VaultResult};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Default multipart part size: 10 MiB.
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Most parts a single multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

/// One byte range of a file sent as a multipart part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct PartRange {
    /// 1-based part number
    number: i32,
    /// Offset of the first byte in the file
    offset: u64,
    /// Bytes in this part
    length: u64,
}

/// A part the service has accepted.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct UploadedPart {
    /// 1-based part number
    number: i32,
    /// Entity tag returned for the part
    etag: String,
}

impl UploadedPart {
    /// Record an accepted part.
    pub fn new(number: i32, etag: impl Into<String>) -> Self {
        Self {
            number,
            etag: etag.into(),
        }
    }
}

/// Split `size` bytes into consecutive parts.
///
/// Parts are `part_size` long except the last. The part size grows when
/// needed so no upload exceeds [`MAX_PARTS`].
pub fn plan_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(size.div_ceil(MAX_PARTS)).max(1);
    let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut offset = 0;
    while offset < size {
        let length = part_size.min(size - offset);
        parts.push(PartRange {
            number: parts.len() as i32 + 1,
            offset,
            length,
        });
        offset += length;
    }
    parts
}

/// Operations the artifact store needs from an object-storage service.
///
/// Implemented for S3-compatible services by [`S3ObjectStore`]; tests plug in
/// in-memory implementations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> VaultResult<()>;

    /// Upload a whole local file under `key` in one request.
    ///
    /// `size` is the already-known length of the file.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path, size: u64) -> VaultResult<()>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> VaultResult<String>;

    /// Send one byte range of `path` as a part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        part: &PartRange,
    ) -> VaultResult<UploadedPart>;

    /// Assemble the uploaded parts, in order, into the final object.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> VaultResult<()>;

    /// Discard a multipart upload and any parts already sent.
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> VaultResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> VaultResult<()>;

    /// Time-limited GET URL for an object.
    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
    -> VaultResult<String>;
}

/// Upload a staged file, in parts when it is larger than `part_size`.
///
/// A failed multipart upload is aborted before the error is returned.
///
/// # Errors
///
/// Any error from the store; an abort failure is logged, not returned.
#[tracing::instrument(skip(store, path), fields(parts = tracing::field::Empty))]
pub async fn upload_file(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    path: &Path,
    size: u64,
    part_size: u64,
) -> VaultResult<()> {
    if size <= part_size {
        return store.put_file(bucket, key, path, size).await;
    }

    let parts = plan_parts(size, part_size);
    tracing::Span::current().record("parts", parts.len());
    let upload_id = store.create_multipart_upload(bucket, key).await?;

    let result = async {
        let mut uploaded = Vec::with_capacity(parts.len());
        for part in &parts {
            uploaded.push(store.upload_part(bucket, key, &upload_id, path, part).await?);
        }
        store
            .complete_multipart_upload(bucket, key, &upload_id, &uploaded)
            .await
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!(upload_id = %upload_id, error = %e, "Multipart upload failed, aborting");
        if let Err(abort) = store.abort_multipart_upload(bucket, key, &upload_id).await {
            tracing::warn!(upload_id = %upload_id, error = %abort, "Multipart abort failed");
        }
    }
    result
}

fn unavailable(message: impl std::fmt::Display) -> StorageError {
    StorageError::new(StorageErrorKind::BackendUnavailable(message.to_string()))
}

/// S3-compatible object store (AWS S3, MinIO, ...).
///
/// Uses path-style addressing so self-hosted endpoints work without
/// wildcard DNS.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Build a client from connection settings.
    #[tracing::instrument(skip(settings), fields(endpoint = %settings.endpoint_url()))]
    pub async fn connect(settings: &ObjectStoreSettings) -> Self {
        let credentials = Credentials::new(
            settings.access_key(),
            settings.secret_key(),
            None,
            None,
            "modelvault",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region().to_string()))
            .credentials_provider(credentials)
            .endpoint_url(settings.endpoint_url())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        tracing::info!("Connected object storage client");
        Self {
            client: S3Client::from_conf(s3_config),
        }
    }

    /// Wrap an existing client.
    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> VaultResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(unavailable(format!("head bucket {}: {}", bucket, service_err)).into());
                }
            }
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::info!(bucket, "Created bucket");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                // Lost a creation race with another uploader
                if service_err.is_bucket_already_owned_by_you() {
                    Ok(())
                } else {
                    Err(unavailable(format!("create bucket {}: {}", bucket, service_err)).into())
                }
            }
        }
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path, size: u64) -> VaultResult<()> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|err| unavailable(format!("put {}/{}: {}", bucket, key, err)))?;

        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> VaultResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| unavailable(format!("start multipart {}/{}: {}", bucket, key, err)))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| unavailable(format!("no upload id for {}/{}", bucket, key)).into())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        part: &PartRange,
    ) -> VaultResult<UploadedPart> {
        let read_error = |e: std::io::Error| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{} part {}: {}",
                path.display(),
                part.number,
                e
            )))
        };

        // One part in memory at a time
        let mut file = tokio::fs::File::open(path).await.map_err(read_error)?;
        file.seek(std::io::SeekFrom::Start(part.offset))
            .await
            .map_err(read_error)?;
        let mut buf = vec![0u8; part.length as usize];
        file.read_exact(&mut buf).await.map_err(read_error)?;

        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part.number)
            .content_length(part.length as i64)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|err| {
                unavailable(format!("part {} of {}/{}: {}", part.number, bucket, key, err))
            })?;

        let etag = output.e_tag().ok_or_else(|| {
            unavailable(format!("no etag for part {} of {}/{}", part.number, bucket, key))
        })?;
        Ok(UploadedPart::new(part.number, etag))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> VaultResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.number)
                            .e_tag(part.etag.clone())
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| unavailable(format!("complete {}/{}: {}", bucket, key, err)))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> VaultResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| unavailable(format!("abort {}/{}: {}", bucket, key, err)))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> VaultResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| unavailable(format!("delete {}/{}: {}", bucket, key, err)))?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> VaultResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| unavailable(format!("presign config: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| unavailable(format!("presign {}/{}: {}", bucket, key, err)))?;

        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parts() {
        let parts = plan_parts(25, 10);
        assert_eq!(
            parts,
            vec![
                PartRange { number: 1, offset: 0, length: 10 },
                PartRange { number: 2, offset: 10, length: 10 },
                PartRange { number: 3, offset: 20, length: 5 },
            ]
        );

        assert_eq!(plan_parts(20, 10).len(), 2);
        assert!(plan_parts(0, 10).is_empty());
    }

    #[test]
    fn test_plan_parts_grows_part_size() {
        // 6 GiB at 10 MiB parts fits well under the part limit
        let six_gib = 6 * 1024 * 1024 * 1024;
        let parts = plan_parts(six_gib, DEFAULT_PART_SIZE);
        assert_eq!(parts.len(), 615);
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), six_gib);

        // 1 TiB would need more than MAX_PARTS at 10 MiB
        let one_tib: u64 = 1024 * 1024 * 1024 * 1024;
        let parts = plan_parts(one_tib, DEFAULT_PART_SIZE);
        assert!(parts.len() as u64 <= MAX_PARTS);
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), one_tib);
        assert_eq!(parts.last().map(|p| p.offset + p.length), Some(one_tib));
    }
}
