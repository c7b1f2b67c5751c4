//! Configuration error types.

/// Kinds of configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ConfigErrorKind {
    /// A settings source could not be read or deserialized
    #[display("Failed to load settings: {}", _0)]
    Load(String),
    /// A setting was read but its value is unusable
    #[display("Invalid value for {}: {}", key, reason)]
    InvalidValue {
        /// Setting name, as spelled in the environment
        key: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Configuration error with location tracking.
///
/// # Examples
///
/// ```
/// use modelvault_error::{ConfigError, ConfigErrorKind};
///
/// let err = ConfigError::invalid("STORAGE_DIR", "must not be empty");
/// assert!(matches!(err.kind, ConfigErrorKind::InvalidValue { .. }));
/// assert!(format!("{}", err).contains("STORAGE_DIR"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    /// The kind of error that occurred
    pub kind: ConfigErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ConfigError {
    /// Create a new configuration error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// A settings source failed to load.
    #[track_caller]
    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Load(message.into()))
    }

    /// A setting has an unusable value.
    #[track_caller]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        })
    }
}
