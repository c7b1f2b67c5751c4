//! Top-level error wrapper types.

use crate::{ConfigError, JsonError, StorageError};

/// Every error the modelvault crates can produce.
///
/// # Examples
///
/// ```
/// use modelvault_error::{ConfigError, VaultError};
///
/// let err: VaultError = ConfigError::load("modelvault.toml: expected a table").into();
/// assert!(format!("{}", err).contains("Configuration Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum VaultErrorKind {
    /// Storage subsystem error
    #[from(StorageError)]
    Storage(StorageError),
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// JSON serialization error
    #[from(JsonError)]
    Json(JsonError),
}

/// Modelvault error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Modelvault Error: {}", _0)]
pub struct VaultError(Box<VaultErrorKind>);

impl VaultError {
    /// Create a new error from a kind.
    pub fn new(kind: VaultErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &VaultErrorKind {
        &self.0
    }

    /// The storage error kind, if this is a storage error.
    pub fn storage_kind(&self) -> Option<&crate::StorageErrorKind> {
        match self.kind() {
            VaultErrorKind::Storage(err) => Some(&err.kind),
            _ => None,
        }
    }
}

// Generic From implementation for any type that converts to VaultErrorKind
impl<T> From<T> for VaultError
where
    T: Into<VaultErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for modelvault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;
