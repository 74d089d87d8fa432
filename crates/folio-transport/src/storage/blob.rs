//! Key/blob storage contract
//!
//! Five methods are all a backend has to implement to become a storage
//! peer. Keys are ordered lists of opaque string components; range
//! operations match on component-wise prefixes, never on substrings.
//!
//! Key convention used by the storage adapter:
//! - `[doc_id]` - primary snapshot slot
//! - `[doc_id, "update", timestamp]` - append-only incremental updates,
//!   where `timestamp` is wallclock milliseconds plus a four-digit
//!   counter so keys stay unique within one millisecond. CRDT
//!   commutativity makes the ordering itself immaterial.

use async_trait::async_trait;
use std::fmt;

/// Component-wise storage key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(pub Vec<String>);

impl StorageKey {
    /// Build from any iterable of components
    pub fn new(components: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// The empty key: prefix of everything
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Key components
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// First component, when present
    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Component-wise prefix test
    pub fn starts_with(&self, prefix: &StorageKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// One stored chunk, as returned by range loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChunk {
    /// The chunk's exact key
    pub key: StorageKey,
    /// Blob contents
    pub data: Vec<u8>,
}

/// Storage operation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Failed to read data
    #[error("failed to read {key}: {message}")]
    ReadFailed {
        /// Key or prefix involved
        key: String,
        /// Backend detail
        message: String,
    },
    /// Failed to write data
    #[error("failed to write {key}: {message}")]
    WriteFailed {
        /// Key involved
        key: String,
        /// Backend detail
        message: String,
    },
    /// Failed to delete data
    #[error("failed to delete {key}: {message}")]
    DeleteFailed {
        /// Key or prefix involved
        key: String,
        /// Backend detail
        message: String,
    },
}

impl StorageError {
    pub(crate) fn read(key: &StorageKey, message: impl fmt::Display) -> Self {
        Self::ReadFailed {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn write(key: &StorageKey, message: impl fmt::Display) -> Self {
        Self::WriteFailed {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn delete(key: &StorageKey, message: impl fmt::Display) -> Self {
        Self::DeleteFailed {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// The storage backend contract
///
/// Range order is unspecified; callers must not rely on it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Return the blob for an exact key, or none
    async fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Durably write one blob
    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<(), StorageError>;

    /// Delete an exact key; deleting a missing key is not an error
    async fn remove(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Return all chunks whose key starts with `prefix`
    async fn load_range(&self, prefix: &StorageKey) -> Result<Vec<StorageChunk>, StorageError>;

    /// Delete all chunks whose key starts with `prefix`
    async fn remove_range(&self, prefix: &StorageKey) -> Result<(), StorageError>;
}
