//! Filesystem cache store.
//!
//! Blobs are written to a temporary file in the shard directory and
//! persisted over the final name, so readers never see a partial entry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{CacheKey, CacheStore, StorageResult};

/// Filesystem-backed cache store with git-style 2-char sharding.
///
/// Layout: `<root>/entries/<first 2 hex chars>/<remaining hex chars>`, where
/// the hex is the SHA-256 of the cache key.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    entries_dir: PathBuf,
}

impl FsCacheStore {
    /// Create a new `FsCacheStore` rooted at `root`. Creates `root/entries/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        Ok(Self { entries_dir })
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.storage_digest();
        self.entries_dir.join(&hex[..2]).join(&hex[2..])
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let shard_dir = match path.parent() {
        Some(dir) => dir,
        None => return Err(StorageError::InvalidPath {
            path: path.display().to_string(),
        }),
    };
    fs::create_dir_all(shard_dir)?;

    // Write to a temp file in the same directory, then rename over the entry.
    let mut tmp = NamedTempFile::new_in(shard_dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>> {
        let path = self.blob_path(key);
        let data = tokio::task::spawn_blocking(move || match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await??;
        Ok(data)
    }

    async fn put(&self, key: &CacheKey, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(key);
        let data = data.to_vec();
        debug!(key = %key, bytes = data.len(), "Writing cache entry");
        tokio::task::spawn_blocking(move || write_atomic(&path, &data)).await?
    }

    async fn contains(&self, key: &CacheKey) -> StorageResult<bool> {
        Ok(self.blob_path(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let (_dir, store) = make_store();
        let key = CacheKey::new("Linux-cargo-1234");
        store.put(&key, b"hello world").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap(), b"hello world");
        assert!(store.contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let (_dir, store) = make_store();
        let key = CacheKey::new("nope");
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(!store.contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let (dir, store) = make_store();
        let key = CacheKey::new("shared");
        store.put(&key, b"first").await.unwrap();
        store.put(&key, b"second").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap(), b"second");

        // One file on disk for the key.
        let hex = key.storage_digest();
        let shard = dir.path().join("entries").join(&hex[..2]);
        let entries: Vec<_> = std::fs::read_dir(shard).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn empty_blob() {
        let (_dir, store) = make_store();
        let key = CacheKey::new("empty");
        store.put(&key, b"").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap(), b"");
    }
}
