//! In-memory table of in-flight uploads.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use derive_getters::Getters;
use serde::Serialize;
use uuid::Uuid;

/// Maximum number of entries returned by [`TransferRegistry::snapshot`].
pub const SNAPSHOT_LIMIT: usize = 20;

/// Advisory number of concurrent uploads a deployment is sized for.
pub const DEFAULT_CAPACITY: usize = 5;

/// Opaque identifier of one in-flight upload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, Serialize,
)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress record of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct TransferEntry {
    id: TransferId,
    filename: String,
    bytes_written: u64,
    total_bytes: Option<u64>,
    started_at: DateTime<Utc>,
}

impl TransferEntry {
    /// Whole-number completion percentage; 0 when the total is unknown.
    pub fn percent(&self) -> u64 {
        match self.total_bytes {
            Some(total) if total > 0 => {
                (u128::from(self.bytes_written) * 100 / u128::from(total)) as u64
            }
            _ => 0,
        }
    }

    fn to_view(&self) -> TransferView {
        TransferView {
            transfer_id: self.id,
            filename: self.filename.clone(),
            bytes: self.bytes_written,
            total: self.total_bytes.unwrap_or(0),
            percent: self.percent(),
            started_at: self.started_at,
        }
    }
}

/// Telemetry view of one active upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
pub struct TransferView {
    transfer_id: TransferId,
    filename: String,
    bytes: u64,
    total: u64,
    percent: u64,
    started_at: DateTime<Utc>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
pub struct TrafficSnapshot {
    active: Vec<TransferView>,
    capacity: usize,
    active_count: usize,
}

/// Shared table of active uploads.
///
/// Built once at startup and handed to every [`ArtifactStore`](crate::ArtifactStore)
/// behind an `Arc`. Entries live only while an upload is in flight. The map is
/// sharded, so uploads updating different entries do not contend on one lock.
///
/// `capacity` is advisory: it is reported in snapshots but never used to
/// reject a new upload.
#[derive(Debug)]
pub struct TransferRegistry {
    entries: DashMap<TransferId, TransferEntry>,
    capacity: usize,
}

impl TransferRegistry {
    /// Create an empty registry with the default advisory capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty registry advertising `capacity` concurrent uploads.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Advisory concurrent upload capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new upload and return its id.
    pub fn register(&self, filename: impl Into<String>, total_bytes: Option<u64>) -> TransferId {
        let id = TransferId::new();
        let entry = TransferEntry {
            id,
            filename: filename.into(),
            bytes_written: 0,
            total_bytes,
            started_at: Utc::now(),
        };

        if self.entries.len() >= self.capacity {
            tracing::debug!(
                active = self.entries.len(),
                capacity = self.capacity,
                "Upload registered beyond advisory capacity"
            );
        }

        self.entries.insert(id, entry);
        id
    }

    /// Add `bytes` to the written count of an upload.
    ///
    /// Returns the new total, or `None` if the upload is not registered.
    pub fn record_progress(&self, id: TransferId, bytes: u64) -> Option<u64> {
        self.entries.get_mut(&id).map(|mut entry| {
            entry.bytes_written += bytes;
            entry.bytes_written
        })
    }

    /// Remove an upload from the table.
    pub fn remove(&self, id: TransferId) -> Option<TransferEntry> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Copy of one entry.
    pub fn get(&self, id: TransferId) -> Option<TransferEntry> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    /// Number of active uploads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no upload is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest [`SNAPSHOT_LIMIT`] active uploads, with the advisory capacity.
    pub fn snapshot(&self) -> TrafficSnapshot {
        let mut entries: Vec<TransferEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

        TrafficSnapshot {
            active_count: entries.len(),
            active: entries
                .iter()
                .take(SNAPSHOT_LIMIT)
                .map(TransferEntry::to_view)
                .collect(),
            capacity: self.capacity,
        }
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
