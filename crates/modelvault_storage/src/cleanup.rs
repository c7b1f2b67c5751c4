//! Best-effort removal of staging files and leftovers.
//!
//! Cleanup never fails an operation. Its outcome is reported as a
//! [`Cleanup`] value and logged, unlike finalize errors which propagate.

use std::io::ErrorKind;
use std::path::Path;

/// Outcome of a best-effort removal.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Cleanup {
    /// The target was removed
    #[display("removed")]
    Removed,
    /// The target did not exist
    #[display("already gone")]
    AlreadyGone,
    /// The target was still in use and left in place
    #[display("kept")]
    Kept,
    /// Removal failed; the failure was logged and swallowed
    #[display("failed: {}", _0)]
    Failed(String),
}

impl Cleanup {
    /// Whether nothing is left behind.
    pub fn is_clean(&self) -> bool {
        !matches!(self, Cleanup::Failed(_))
    }

    fn from_result(path: &Path, result: std::io::Result<()>) -> Self {
        match result {
            Ok(()) => Cleanup::Removed,
            Err(e) if e.kind() == ErrorKind::NotFound => Cleanup::AlreadyGone,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Best-effort cleanup failed");
                Cleanup::Failed(e.to_string())
            }
        }
    }
}

/// Remove a file, swallowing and logging any failure.
pub async fn remove_file(path: &Path) -> Cleanup {
    Cleanup::from_result(path, tokio::fs::remove_file(path).await)
}

/// Blocking variant of [`remove_file`], for `Drop` and blocking threads.
pub fn remove_file_blocking(path: &Path) -> Cleanup {
    Cleanup::from_result(path, std::fs::remove_file(path))
}

/// Remove a directory only if it is empty.
///
/// A non-empty directory is reported as [`Cleanup::Kept`].
pub async fn remove_dir_if_empty(path: &Path) -> Cleanup {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => Cleanup::Removed,
        Err(e) if e.kind() == ErrorKind::NotFound => Cleanup::AlreadyGone,
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => Cleanup::Kept,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Directory left in place");
            Cleanup::Failed(e.to_string())
        }
    }
}
