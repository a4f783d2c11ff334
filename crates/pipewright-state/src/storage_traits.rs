//! Storage trait definitions for pipewright
//!
//! These traits define the two storage abstractions the engine talks to:
//! - `CacheStore`: keyed blob storage (restore/save by cache key)
//! - `DeployTarget`: a published file tree with commit history
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::tree::Tree;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// CacheStore: keyed blob storage
// ---------------------------------------------------------------------------

/// Cache key as produced by the cache manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        CacheKey(key.into())
    }

    /// Return the full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the key, used by backends that need a filesystem-safe name.
    pub fn storage_digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keyed blob store that persists across runs.
///
/// Guarantees:
/// - `get` returns exactly the bytes of the most recent `put` for the key.
/// - An absent key is `Ok(None)`, never an error.
/// - Concurrent `put`s for the same key are allowed; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the blob stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> StorageResult<Option<Vec<u8>>>;

    /// Store `data` under `key`, replacing any previous blob.
    async fn put(&self, key: &CacheKey, data: &[u8]) -> StorageResult<()>;

    /// Check whether `key` has a stored blob.
    async fn contains(&self, key: &CacheKey) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// DeployTarget: published artifact tree
// ---------------------------------------------------------------------------

/// A set of changes applied to a deploy target in one step.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Files to create or overwrite, by relative path.
    pub writes: BTreeMap<String, Vec<u8>>,
    /// Files to remove, by relative path.
    pub deletions: BTreeSet<String>,
    /// Commit message recorded in the target history.
    pub message: String,
    /// Replace the whole history with the new commit.
    pub single_commit: bool,
}

impl Changeset {
    /// Check paths and reject changesets that both write and delete a path.
    pub fn validate(&self) -> StorageResult<()> {
        for path in self.writes.keys().chain(self.deletions.iter()) {
            crate::tree::validate_relative(path)?;
        }
        if let Some(path) = self.deletions.iter().find(|p| self.writes.contains_key(*p)) {
            return Err(StorageError::ConflictingChange { path: path.clone() });
        }
        Ok(())
    }

    /// Apply the changeset to an in-memory tree.
    pub fn apply_to(&self, tree: &mut Tree) {
        for path in &self.deletions {
            tree.remove(path);
        }
        for (path, data) in &self.writes {
            tree.insert(path.clone(), data.clone());
        }
    }
}

/// One entry in a deploy target's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployCommit {
    /// SHA-256 over the parent id and the resulting tree
    pub id: String,
    /// Previous commit, `None` for a root commit
    pub parent: Option<String>,
    pub message: String,
    /// Number of files in the tree after this commit
    pub files: usize,
    pub created_at: DateTime<Utc>,
}

impl DeployCommit {
    /// Build the commit that records `tree` on top of `history`.
    ///
    /// With `single_commit` the new commit is a root commit, since the
    /// history it would point to is discarded.
    pub fn record(history: &[DeployCommit], tree: &Tree, message: &str, single_commit: bool) -> Self {
        let parent = if single_commit {
            None
        } else {
            history.last().map(|c| c.id.clone())
        };

        let mut hasher = Sha256::new();
        if let Some(p) = &parent {
            hasher.update(p.as_bytes());
        }
        hasher.update(b"\0");
        for (path, data) in tree {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(Sha256::digest(data));
        }

        DeployCommit {
            id: hex::encode(hasher.finalize()),
            parent,
            message: message.to_string(),
            files: tree.len(),
            created_at: Utc::now(),
        }
    }

    /// Short form (first 12 hex chars).
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }
}

/// Append `commit` to `history`, or make it the only entry.
pub fn extend_history(history: &mut Vec<DeployCommit>, commit: DeployCommit, single_commit: bool) {
    if single_commit {
        history.clear();
    }
    history.push(commit);
}

/// Deploy destination.
///
/// Guarantees:
/// - `publish` is all-or-nothing: on error the listed files and history are
///   exactly what they were before the call.
/// - `list` never reports backend metadata (such as history storage).
/// - `history` is ordered oldest first.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Relative paths of every file currently published.
    async fn list(&self) -> StorageResult<BTreeSet<String>>;

    /// Apply `changes` atomically and record a commit.
    async fn publish(&self, changes: Changeset) -> StorageResult<DeployCommit>;

    /// Commit history, oldest first.
    async fn history(&self) -> StorageResult<Vec<DeployCommit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &str)]) -> Tree {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn cache_key_storage_digest_is_hex() {
        let key = CacheKey::new("Linux-cargo-abc");
        assert_eq!(key.storage_digest().len(), 64);
        assert_eq!(key.to_string(), "Linux-cargo-abc");
    }

    #[test]
    fn changeset_rejects_write_and_delete_of_same_path() {
        let mut changes = Changeset::default();
        changes.writes.insert("a.html".into(), b"a".to_vec());
        changes.deletions.insert("a.html".into());
        assert!(matches!(
            changes.validate(),
            Err(StorageError::ConflictingChange { .. })
        ));
    }

    #[test]
    fn changeset_rejects_escaping_paths() {
        let mut changes = Changeset::default();
        changes.deletions.insert("../outside".into());
        assert!(matches!(changes.validate(), Err(StorageError::InvalidPath { .. })));
    }

    #[test]
    fn commit_id_depends_on_tree_and_parent() {
        let t1 = tree(&[("a", "1")]);
        let t2 = tree(&[("a", "2")]);
        let c1 = DeployCommit::record(&[], &t1, "m", false);
        let c2 = DeployCommit::record(&[], &t2, "m", false);
        assert_ne!(c1.id, c2.id);

        let c3 = DeployCommit::record(&[c1.clone()], &t1, "m", false);
        assert_eq!(c3.parent.as_deref(), Some(c1.id.as_str()));
        assert_ne!(c3.id, c1.id);
    }

    #[test]
    fn single_commit_record_has_no_parent_and_resets_history() {
        let t = tree(&[("a", "1")]);
        let first = DeployCommit::record(&[], &t, "first", false);
        let mut history = vec![first.clone()];

        let second = DeployCommit::record(&history, &t, "second", true);
        assert!(second.parent.is_none());
        extend_history(&mut history, second.clone(), true);
        assert_eq!(history, vec![second]);
    }
}
