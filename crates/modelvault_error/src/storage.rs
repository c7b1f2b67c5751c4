//! Storage error types.

/// Kinds of storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum StorageErrorKind {
    /// Locator references bytes that do not exist
    #[display("Artifact not found: {}", _0)]
    NotFound(String),
    /// Object storage endpoint or bucket cannot be reached or created
    #[display("Storage backend unavailable: {}", _0)]
    BackendUnavailable(String),
    /// Failed to create a storage directory
    #[display("Failed to create storage directory: {}", _0)]
    DirectoryCreation(String),
    /// Failed to write a staging or final file
    #[display("Failed to write file: {}", _0)]
    FileWrite(String),
    /// Failed to read a file
    #[display("Failed to read file: {}", _0)]
    FileRead(String),
    /// Failed to move a staged file into place
    #[display("Failed to rename file: {}", _0)]
    Rename(String),
    /// The caller's byte source failed mid-transfer
    #[display("Failed to read upload stream: {}", _0)]
    StreamRead(String),
    /// Locator string could not be decoded
    #[display("Malformed storage locator: {}", _0)]
    MalformedLocator(String),
    /// Caller-supplied filename has no usable final component
    #[display("Invalid filename: {}", _0)]
    InvalidFilename(String),
    /// Caller is not allowed to touch the artifact
    #[display("Unauthorized: {}", _0)]
    Unauthorized(String),
}

/// Storage error with location tracking.
///
/// # Examples
///
/// ```
/// use modelvault_error::{StorageError, StorageErrorKind};
///
/// let err = StorageError::new(StorageErrorKind::NotFound("/srv/storage/ab/model.bin".to_string()));
/// assert!(err.is_not_found());
/// assert!(format!("{}", err).contains("not found"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Storage Error: {} at line {} in {}", kind, line, file)]
pub struct StorageError {
    /// The kind of error that occurred
    pub kind: StorageErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl StorageError {
    /// Create a new storage error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: StorageErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Whether the error means the referenced bytes are missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, StorageErrorKind::NotFound(_))
    }
}
