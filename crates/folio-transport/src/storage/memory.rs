//! In-memory blob store
//!
//! Clones share the same map, which is what makes it useful: tests hand
//! one clone to a repo, destroy the repo, and hand another clone to its
//! replacement to simulate a restart against surviving storage.

use super::blob::{BlobStore, StorageChunk, StorageError, StorageKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared in-memory key/blob map
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    chunks: Arc<Mutex<BTreeMap<StorageKey, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// All keys currently stored, in key order
    pub fn keys(&self) -> Vec<StorageKey> {
        self.chunks.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.chunks.lock().get(key).cloned())
    }

    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<(), StorageError> {
        self.chunks.lock().insert(key.clone(), data.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.chunks.lock().remove(key);
        Ok(())
    }

    async fn load_range(&self, prefix: &StorageKey) -> Result<Vec<StorageChunk>, StorageError> {
        Ok(self
            .chunks
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| StorageChunk {
                key: key.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn remove_range(&self, prefix: &StorageKey) -> Result<(), StorageError> {
        self.chunks.lock().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
