//! Tests for the local-disk artifact store.

use futures::stream;
use modelvault_storage::{
    ArtifactRecord, ArtifactStore, DownloadTarget, StorageErrorKind, StorageLocator,
    StorageSettings, TransferRegistry, sha256_hex,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const MIB: usize = 1024 * 1024;

fn store(dir: &TempDir) -> ArtifactStore {
    ArtifactStore::local(dir.path(), Arc::new(TransferRegistry::new())).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn staging_files(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("tmp_"))
        .collect()
}

/// Staging files are removed on the blocking pool after a drop.
async fn wait_for_no_staging(root: &Path) -> Vec<String> {
    for _ in 0..100 {
        if staging_files(root).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    staging_files(root)
}

#[tokio::test]
async fn test_empty_upload() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let upload = store.begin_upload("empty.bin", Some(0)).await.unwrap();
    let stored = upload.complete().await.unwrap();

    assert_eq!(stored.digest().as_str(), EMPTY_SHA256);
    assert_eq!(*stored.size(), 0);

    let path = stored.locator().as_path().unwrap().to_path_buf();
    assert!(path.ends_with(format!("{}/empty.bin", EMPTY_SHA256)));
    assert_eq!(path, temp_dir.path().join(EMPTY_SHA256).join("empty.bin"));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert!(staging_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_chunked_and_whole_uploads_agree() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let data = pattern(3 * MIB);

    let mut upload = store.begin_upload("chunked.bin", Some(data.len() as u64)).await.unwrap();
    for chunk in data.chunks(MIB) {
        upload.write_chunk(chunk).await.unwrap();
    }
    let chunked = upload.complete().await.unwrap();

    let mut upload = store.begin_upload("whole.bin", None).await.unwrap();
    upload.write_chunk(&data).await.unwrap();
    let whole = upload.complete().await.unwrap();

    assert_eq!(chunked.digest(), whole.digest());
    assert_eq!(*chunked.size(), (3 * MIB) as u64);
    assert_eq!(chunked.size(), whole.size());
    assert_eq!(*chunked.digest(), sha256_hex(&data));

    let on_disk = std::fs::read(chunked.locator().as_path().unwrap()).unwrap();
    assert_eq!(on_disk, data);
}

#[tokio::test]
async fn test_size_is_sum_of_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let chunks: Vec<Vec<u8>> = vec![pattern(17), Vec::new(), pattern(4096), pattern(1)];
    let expected: Vec<u8> = chunks.concat();

    let mut upload = store.begin_upload("parts.bin", None).await.unwrap();
    for chunk in &chunks {
        upload.write_chunk(chunk).await.unwrap();
    }
    assert_eq!(upload.bytes_written(), expected.len() as u64);
    let stored = upload.complete().await.unwrap();

    assert_eq!(*stored.size(), expected.len() as u64);
    assert_eq!(*stored.digest(), sha256_hex(&expected));
}

#[tokio::test]
async fn test_identical_content_shares_directory() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let data = b"same weights";

    let first = store
        .store_stream("a.bin", None, stream::iter(vec![Ok::<_, std::io::Error>(data.to_vec())]))
        .await
        .unwrap();
    let second = store
        .store_stream("b.bin", None, stream::iter(vec![Ok::<_, std::io::Error>(data.to_vec())]))
        .await
        .unwrap();

    let dir_a = first.locator().as_path().unwrap().parent().unwrap().to_path_buf();
    let dir_b = second.locator().as_path().unwrap().parent().unwrap().to_path_buf();
    assert_eq!(dir_a, dir_b);
    assert_eq!(dir_a, temp_dir.path().join(first.digest().as_str()));
    assert_ne!(first.locator(), second.locator());

    // Both filenames are kept side by side
    assert!(dir_a.join("a.bin").exists());
    assert!(dir_a.join("b.bin").exists());
}

#[tokio::test]
async fn test_store_reader() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let data = pattern(2 * MIB + 123);

    let stored = store
        .store_reader("reader.bin", Some(data.len() as u64), std::io::Cursor::new(data.clone()))
        .await
        .unwrap();

    assert_eq!(*stored.size(), data.len() as u64);
    assert_eq!(*stored.digest(), sha256_hex(&data));
}

#[tokio::test]
async fn test_store_blocking() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let data = pattern(10_000);

    let chunks: Vec<std::io::Result<Vec<u8>>> =
        data.chunks(999).map(|c| Ok(c.to_vec())).collect();
    let stored = store.store_blocking("sync.bin", None, chunks).await.unwrap();

    assert_eq!(*stored.size(), 10_000);
    assert_eq!(*stored.digest(), sha256_hex(&data));
    assert!(store.snapshot_active_transfers().active().is_empty());
}

#[tokio::test]
async fn test_store_blocking_source_error() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let chunks: Vec<std::io::Result<Vec<u8>>> = vec![
        Ok(b"partial".to_vec()),
        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "client went away")),
    ];
    let err = store.store_blocking("broken.bin", None, chunks).await.unwrap_err();

    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::StreamRead(_))));
    assert!(store.registry().is_empty());
    assert!(staging_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_stream_error_aborts_transfer() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let chunks = vec![
        Ok(b"first".to_vec()),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        Ok(b"never written".to_vec()),
    ];
    let err = store
        .store_stream("dropped.bin", Some(100), stream::iter(chunks))
        .await
        .unwrap_err();

    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::StreamRead(_))));
    assert!(store.snapshot_active_transfers().active().is_empty());
    assert!(staging_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_abort_removes_registry_entry() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let mut upload = store.begin_upload("half.bin", Some(1000)).await.unwrap();
    upload.write_chunk(&pattern(500)).await.unwrap();

    let snapshot = store.snapshot_active_transfers();
    assert_eq!(snapshot.active().len(), 1);
    assert_eq!(*snapshot.active()[0].transfer_id(), upload.id());
    assert_eq!(*snapshot.active()[0].bytes(), 500);
    assert_eq!(*snapshot.active()[0].percent(), 50);

    let outcome = upload.abort().await;
    assert!(outcome.is_clean());

    let snapshot = store.snapshot_active_transfers();
    assert!(snapshot.active().is_empty());
    assert_eq!(*snapshot.active_count(), 0);
    assert!(staging_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_dropped_upload_is_cleaned_up() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    {
        let mut upload = store.begin_upload("cancelled.bin", None).await.unwrap();
        upload.write_chunk(b"some bytes").await.unwrap();
        assert_eq!(store.registry().len(), 1);
    }

    assert!(store.registry().is_empty());
    assert!(wait_for_no_staging(temp_dir.path()).await.is_empty());
}

#[tokio::test]
async fn test_cancelled_blocking_upload_is_cleaned_up() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let slow_chunks = (0..5).map(|_| {
        std::thread::sleep(Duration::from_millis(50));
        Ok::<_, std::io::Error>(vec![1u8; 10])
    });
    let result = tokio::time::timeout(
        Duration::from_millis(60),
        store.store_blocking("slow.bin", Some(50), slow_chunks),
    )
    .await;
    assert!(result.is_err(), "upload should still be running");

    assert!(store.registry().is_empty());
    assert!(store.snapshot_active_transfers().active().is_empty());
    assert_eq!(*store.snapshot_active_transfers().active_count(), 0);

    // The blocking writer notices at its next chunk
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(wait_for_no_staging(temp_dir.path()).await.is_empty());
    assert!(store.registry().is_empty());
}

#[tokio::test]
async fn test_cancelled_stream_upload_is_cleaned_up() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let endless = stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, std::io::Error>(vec![2u8; 64]), ()))
    });
    let result = tokio::time::timeout(
        Duration::from_millis(50),
        store.store_stream("endless.bin", None, endless),
    )
    .await;
    assert!(result.is_err());

    assert!(store.registry().is_empty());
    assert!(wait_for_no_staging(temp_dir.path()).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upload_and_delete_of_identical_content() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut failures = Vec::new();
                for i in 0..100 {
                    let name = format!("w{}_{}.bin", worker, i);
                    let chunks = vec![Ok::<_, std::io::Error>(b"identical".to_vec())];
                    match store.store_blocking(&name, None, chunks).await {
                        Ok(stored) => store.delete_artifact(stored.locator()).await.unwrap(),
                        Err(e) => failures.push(e.to_string()),
                    }
                }
                failures
            })
        })
        .collect();

    for handle in handles {
        let failures = handle.await.unwrap();
        assert!(failures.is_empty(), "{:?}", failures.first());
    }

    let digest_dir = temp_dir.path().join(sha256_hex(b"identical").as_str());
    assert!(!digest_dir.exists());
    assert!(store.registry().is_empty());
}

#[tokio::test]
async fn test_same_filename_concurrent_uploads() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let mut first = store.begin_upload("model.bin", None).await.unwrap();
    let mut second = store.begin_upload("model.bin", None).await.unwrap();
    assert_ne!(first.id(), second.id());

    first.write_chunk(b"first ").await.unwrap();
    second.write_chunk(b"second ").await.unwrap();
    first.write_chunk(b"payload").await.unwrap();
    second.write_chunk(b"payload").await.unwrap();

    let a = first.complete().await.unwrap();
    let b = second.complete().await.unwrap();

    assert_eq!(*a.digest(), sha256_hex(b"first payload"));
    assert_eq!(*b.digest(), sha256_hex(b"second payload"));
    assert_eq!(std::fs::read(a.locator().as_path().unwrap()).unwrap(), b"first payload");
    assert_eq!(std::fs::read(b.locator().as_path().unwrap()).unwrap(), b"second payload");
}

#[tokio::test]
async fn test_parallel_uploads() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let data = pattern(64 * 1024 + i);
                let mut upload = store
                    .begin_upload(&format!("model-{}.bin", i), Some(data.len() as u64))
                    .await
                    .unwrap();
                for chunk in data.chunks(4096) {
                    upload.write_chunk(chunk).await.unwrap();
                }
                let stored = upload.complete().await.unwrap();
                assert_eq!(*stored.digest(), sha256_hex(&data));
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(store.registry().is_empty());
}

#[tokio::test]
async fn test_filename_is_sanitized() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let upload = store.begin_upload("../../escape.bin", None).await.unwrap();
    assert_eq!(upload.filename(), "escape.bin");
    let stored = upload.complete().await.unwrap();
    assert!(stored.locator().as_path().unwrap().starts_with(temp_dir.path()));

    let err = store.begin_upload("..", None).await.unwrap_err();
    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::InvalidFilename(_))));
    assert!(store.registry().is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let mut upload = store.begin_upload("delete-me.bin", None).await.unwrap();
    upload.write_chunk(b"bytes").await.unwrap();
    let stored = upload.complete().await.unwrap();
    let path = stored.locator().as_path().unwrap().to_path_buf();

    store.delete_artifact(stored.locator()).await.unwrap();
    assert!(!path.exists());
    // Empty digest directory is pruned
    assert!(!path.parent().unwrap().exists());

    store.delete_artifact(stored.locator()).await.unwrap();
}

#[tokio::test]
async fn test_delete_keeps_sibling() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let stored_a = store
        .store_blocking("a.bin", None, vec![Ok::<_, std::io::Error>(b"shared".to_vec())])
        .await
        .unwrap();
    let stored_b = store
        .store_blocking("b.bin", None, vec![Ok::<_, std::io::Error>(b"shared".to_vec())])
        .await
        .unwrap();

    store.delete_artifact(stored_a.locator()).await.unwrap();
    assert!(stored_b.locator().as_path().unwrap().exists());
}

#[tokio::test]
async fn test_resolve_download() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let mut upload = store.begin_upload("serve.bin", None).await.unwrap();
    upload.write_chunk(b"payload").await.unwrap();
    let stored = upload.complete().await.unwrap();

    let target = store.resolve_download(stored.locator()).await.unwrap();
    assert_eq!(
        target,
        DownloadTarget::LocalFile(stored.locator().as_path().unwrap().to_path_buf())
    );

    store.delete_artifact(stored.locator()).await.unwrap();
    let err = store.resolve_download(stored.locator()).await.unwrap_err();
    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::NotFound(_))));
}

#[tokio::test]
async fn test_object_locator_without_object_backend() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let locator = StorageLocator::object("models", "abc/model.bin");
    let err = store.delete_artifact(&locator).await.unwrap_err();
    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::BackendUnavailable(_))));

    // An empty key names nothing
    let empty = StorageLocator::decode("s3://models").unwrap();
    store.delete_artifact(&empty).await.unwrap();
    let err = store.resolve_download(&empty).await.unwrap_err();
    assert!(matches!(err.storage_kind(), Some(StorageErrorKind::NotFound(_))));
}

#[tokio::test]
async fn test_incomplete_object_settings_store_locally() {
    let temp_dir = TempDir::new().unwrap();
    let settings = StorageSettings::local(temp_dir.path())
        .with_storage_backend("object")
        .with_s3_endpoint("localhost:9000")
        .with_s3_bucket("models")
        .with_s3_secret_key("secret")
        .with_s3_access_key("");

    let store = ArtifactStore::from_settings(&settings, Arc::new(TransferRegistry::new()))
        .await
        .unwrap();
    assert_eq!(store.backend().name(), "local");

    let mut upload = store.begin_upload("fallback.bin", None).await.unwrap();
    upload.write_chunk(b"data").await.unwrap();
    let stored = upload.complete().await.unwrap();

    assert!(stored.locator().is_local());
    assert!(!stored.locator().encode().starts_with("s3://"));
}

#[tokio::test]
async fn test_artifact_record() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);

    let mut upload = store.begin_upload("model.onnx", None).await.unwrap();
    upload.write_chunk(b"onnx").await.unwrap();
    let stored = upload.complete().await.unwrap();
    let locator = stored.locator().clone();

    let record = ArtifactRecord::new(stored.clone(), None);
    assert_eq!(record.mime(), "application/octet-stream");
    assert_eq!(record.filename(), "model.onnx");
    assert_eq!(*record.size(), 4);
    assert_eq!(record.sha256(), stored.digest());
    assert_eq!(StorageLocator::decode(record.storage_locator()).unwrap(), locator);

    let record = ArtifactRecord::new(stored, Some("application/onnx"));
    assert_eq!(record.mime(), "application/onnx");
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["sha256"], sha256_hex(b"onnx").as_str());
}
