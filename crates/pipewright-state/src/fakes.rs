//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryCacheStore` and `MemoryDeployTarget` that satisfy the
//! trait contracts without touching the filesystem.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;
use crate::tree::Tree;

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

/// In-memory cache store backed by a `HashMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let store = self.store.lock().unwrap();
        let mut keys: Vec<_> = store.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>> {
        let store = self.store.lock().unwrap();
        Ok(store.get(key.as_str()).cloned())
    }

    async fn put(&self, key: &CacheKey, data: &[u8]) -> StorageResult<()> {
        let mut store = self.store.lock().unwrap();
        store.insert(key.as_str().to_string(), data.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> StorageResult<bool> {
        let store = self.store.lock().unwrap();
        Ok(store.contains_key(key.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryDeployTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TargetState {
    files: Tree,
    history: Vec<DeployCommit>,
}

/// In-memory deploy target.
///
/// `fail_on_write` injects a backend failure whenever a changeset writes the
/// given path, which lets tests observe that a failed publish changes nothing.
#[derive(Debug, Default)]
pub struct MemoryDeployTarget {
    state: Mutex<TargetState>,
    fail_on_write: Option<String>,
}

impl MemoryDeployTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given files already published (no history).
    pub fn with_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let files = files
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        MemoryDeployTarget {
            state: Mutex::new(TargetState {
                files,
                history: Vec::new(),
            }),
            fail_on_write: None,
        }
    }

    /// Fail any publish that writes `path`.
    pub fn fail_on_write(mut self, path: impl Into<String>) -> Self {
        self.fail_on_write = Some(path.into());
        self
    }

    /// Content of a published file.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }
}

#[async_trait]
impl DeployTarget for MemoryDeployTarget {
    async fn list(&self) -> StorageResult<BTreeSet<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.files.keys().cloned().collect())
    }

    async fn publish(&self, changes: Changeset) -> StorageResult<DeployCommit> {
        changes.validate()?;
        let mut state = self.state.lock().unwrap();

        let mut files = state.files.clone();
        changes.apply_to(&mut files);

        if let Some(bad) = &self.fail_on_write {
            if changes.writes.contains_key(bad) {
                return Err(StorageError::Backend(format!("injected failure writing {}", bad)));
            }
        }

        let commit = DeployCommit::record(&state.history, &files, &changes.message, changes.single_commit);
        let mut history = state.history.clone();
        extend_history(&mut history, commit.clone(), changes.single_commit);

        state.files = files;
        state.history = history;
        Ok(commit)
    }

    async fn history(&self) -> StorageResult<Vec<DeployCommit>> {
        Ok(self.state.lock().unwrap().history.clone())
    }
}
