//! Filesystem blob store
//!
//! One file per chunk in a flat directory. Key components are hex-encoded
//! and joined with `.`, which keeps arbitrary component bytes path-safe
//! and makes component-wise prefix matching a plain string comparison on
//! encoded segments. Blobs are small (CRDT snapshots and deltas), so the
//! store uses straightforward blocking file I/O from the storage worker.

use super::blob::{BlobStore, StorageChunk, StorageError, StorageKey};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory-backed blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StorageError::write(&StorageKey::root(), format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(key: &StorageKey) -> String {
        key.components()
            .iter()
            .map(|c| hex::encode(c.as_bytes()))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn parse_file_name(name: &str) -> Option<StorageKey> {
        let mut components = Vec::new();
        for segment in name.split('.') {
            let bytes = hex::decode(segment).ok()?;
            components.push(String::from_utf8(bytes).ok()?);
        }
        Some(StorageKey(components))
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(Self::file_name(key))
    }

    fn keys_under(&self, prefix: &StorageKey) -> Result<Vec<(StorageKey, PathBuf)>, StorageError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::read(prefix, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::read(prefix, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = Self::parse_file_name(name) else {
                continue;
            };
            if key.starts_with(prefix) {
                out.push((key, entry.path()));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(key, e)),
        }
    }

    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        // ".tmp" is not valid hex, so scans skip half-written files
        let tmp = self.root.join(format!("{}.tmp", Self::file_name(key)));
        fs::write(&tmp, data).map_err(|e| StorageError::write(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::write(key, e))?;
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete(key, e)),
        }
    }

    async fn load_range(&self, prefix: &StorageKey) -> Result<Vec<StorageChunk>, StorageError> {
        let mut chunks = Vec::new();
        for (key, path) in self.keys_under(prefix)? {
            let data = fs::read(&path).map_err(|e| StorageError::read(&key, e))?;
            chunks.push(StorageChunk { key, data });
        }
        Ok(chunks)
    }

    async fn remove_range(&self, prefix: &StorageKey) -> Result<(), StorageError> {
        for (key, path) in self.keys_under(prefix)? {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::delete(&key, e)),
            }
        }
        Ok(())
    }
}
