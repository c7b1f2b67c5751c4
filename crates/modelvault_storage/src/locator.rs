//! Storage locator encoding.
//!
//! A locator is the only thing the metadata layer keeps about where bytes
//! live. It is either a plain filesystem path or an `s3://bucket/key` URI.

use modelvault_error::{StorageError, StorageErrorKind};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// URI scheme marker for object-storage locators.
pub const OBJECT_SCHEME: &str = "s3://";

/// Where an artifact's bytes physically live.
///
/// # Example
///
/// ```
/// use modelvault_storage::StorageLocator;
///
/// let loc: StorageLocator = "s3://models/abc/weights.bin".parse().unwrap();
/// assert_eq!(loc, StorageLocator::object("models", "abc/weights.bin"));
/// assert_eq!(loc.to_string(), "s3://models/abc/weights.bin");
///
/// let local: StorageLocator = "storage/abc/weights.bin".parse().unwrap();
/// assert!(local.is_local());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageLocator {
    /// File on the local filesystem
    Local(PathBuf),
    /// Object in a bucket
    Object {
        /// Bucket name
        bucket: String,
        /// Object key; empty means the locator names no object
        key: String,
    },
}

impl StorageLocator {
    /// Build a local locator.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(path.into())
    }

    /// Build an object-storage locator.
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Object {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the bytes live on local disk.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Local path, if this is a local locator.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Object { .. } => None,
        }
    }

    /// Encode to the string persisted by the metadata layer.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a persisted locator string.
    ///
    /// Strings without the `s3://` marker are local paths. An object locator
    /// with no `/` after the bucket decodes with an empty key.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLocator` for an empty string or an empty bucket name.
    pub fn decode(s: &str) -> Result<Self, StorageError> {
        if s.is_empty() {
            return Err(StorageError::new(StorageErrorKind::MalformedLocator(
                "empty locator".to_string(),
            )));
        }

        let Some(rest) = s.strip_prefix(OBJECT_SCHEME) else {
            return Ok(Self::Local(PathBuf::from(s)));
        };

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::new(StorageErrorKind::MalformedLocator(format!(
                "missing bucket: {}",
                s
            ))));
        }

        Ok(Self::object(bucket, key))
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Object { bucket, key } => write!(f, "{}{}/{}", OBJECT_SCHEME, bucket, key),
        }
    }
}

impl FromStr for StorageLocator {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
