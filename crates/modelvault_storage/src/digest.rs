//! Incremental SHA-256 digest accumulation.

use modelvault_error::{StorageError, StorageErrorKind};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Streaming SHA-256 state fed chunk-by-chunk.
///
/// The final digest depends only on the concatenated bytes, never on how
/// they were split into chunks. Zero-length chunks are accepted and change
/// nothing.
///
/// # Example
///
/// ```
/// use modelvault_storage::DigestAccumulator;
///
/// let mut acc = DigestAccumulator::new();
/// acc.update(b"hello ");
/// acc.update(b"");
/// acc.update(b"world");
/// assert_eq!(acc.bytes(), 11);
///
/// let digest = acc.finalize();
/// assert_eq!(digest, modelvault_storage::sha256_hex(b"hello world"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DigestAccumulator {
    hasher: Sha256,
    bytes: u64,
}

impl DigestAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Consuming form of [`update`](Self::update), for folding over chunks.
    pub fn chain(mut self, chunk: &[u8]) -> Self {
        self.update(chunk);
        self
    }

    /// Number of bytes fed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish hashing and return the lowercase hex digest.
    pub fn finalize(self) -> ContentDigest {
        ContentDigest(format!("{:x}", self.hasher.finalize()))
    }
}

/// Hash a complete buffer in one call.
pub fn sha256_hex(data: &[u8]) -> ContentDigest {
    DigestAccumulator::new().chain(data).finalize()
}

/// A 64-character lowercase hex SHA-256 digest.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, serde::Serialize,
)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Borrow the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ContentDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentDigest {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == DIGEST_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StorageError::new(StorageErrorKind::MalformedLocator(format!(
                "not a sha256 hex digest: {}",
                s
            ))));
        }
        Ok(Self(s.to_string()))
    }
}

impl PartialEq<&str> for ContentDigest {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
