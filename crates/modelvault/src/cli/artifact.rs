//! Artifact command handlers.

use modelvault::{
    ArtifactRecord, ArtifactStore, DownloadTarget, JsonError, StorageError, StorageErrorKind,
    StorageLocator, StorageSettings, TransferRegistry, VaultResult,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Build the store from settings, using `config` when given.
pub async fn open_store(config: Option<&Path>) -> VaultResult<ArtifactStore> {
    let settings = match config {
        Some(path) => StorageSettings::load_file(path)?,
        None => StorageSettings::load()?,
    };
    ArtifactStore::from_settings(&settings, Arc::new(TransferRegistry::new())).await
}

/// Store a file and print its record.
pub async fn put_artifact(
    store: &ArtifactStore,
    path: &Path,
    name: Option<&str>,
    mime: Option<&str>,
) -> VaultResult<()> {
    let record = store_file(store, path, name, mime).await?;
    print_json(&record)
}

/// Delete stored bytes and print the locator that was removed.
pub async fn delete_artifact(store: &ArtifactStore, locator: &str) -> VaultResult<()> {
    let locator = StorageLocator::decode(locator)?;
    store.delete_artifact(&locator).await?;
    print_json(&json!({ "deleted": locator.encode() }))
}

/// Print how a locator would be served.
pub async fn resolve_artifact(store: &ArtifactStore, locator: &str) -> VaultResult<()> {
    let locator = StorageLocator::decode(locator)?;
    let target = store.resolve_download(&locator).await?;
    print_json(&target_json(&target))
}

async fn store_file(
    store: &ArtifactStore,
    path: &Path,
    name: Option<&str>,
    mime: Option<&str>,
) -> VaultResult<ArtifactRecord> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        StorageError::new(StorageErrorKind::FileRead(format!("{}: {}", path.display(), e)))
    })?;
    let total = file.metadata().await.ok().map(|m| m.len());

    let filename = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    };

    let stored = store.store_reader(&filename, total, file).await?;
    Ok(ArtifactRecord::new(stored, mime))
}

fn target_json(target: &DownloadTarget) -> serde_json::Value {
    match target {
        DownloadTarget::LocalFile(path) => json!({ "file": path.display().to_string() }),
        DownloadTarget::Redirect(url) => json!({ "redirect": url }),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> VaultResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(JsonError::from)?;
    println!("{}", json);
    Ok(())
}
