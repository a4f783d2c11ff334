//! Filesystem deploy target.
//!
//! The published tree is a plain directory. History is kept inside it under
//! `.pipewright/history.json`, which is never listed and never touched by
//! changesets, so a history update travels with the tree it describes.
//!
//! `publish` builds the next tree in a staging directory next to the target
//! and swaps it into place. If anything fails before the swap, the staging
//! directory is discarded and the target is untouched.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage_traits::*;
use crate::tree::{self, Tree};

/// Reserved top-level directory holding deploy metadata.
pub const META_DIR: &str = ".pipewright";

const HISTORY_FILE: &str = "history.json";

/// Deploy target backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsDeployTarget {
    root: PathBuf,
}

impl FsDeployTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_history(root: &Path) -> StorageResult<Vec<DeployCommit>> {
    let path = root.join(META_DIR).join(HISTORY_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn list_published(root: &Path) -> StorageResult<Tree> {
    if !root.exists() {
        return Ok(Tree::new());
    }
    Ok(tree::read_tree(root, &[META_DIR])?)
}

fn check_reserved(changes: &Changeset) -> StorageResult<()> {
    let prefix = format!("{}/", META_DIR);
    let reserved = changes
        .writes
        .keys()
        .chain(changes.deletions.iter())
        .find(|p| p.as_str() == META_DIR || p.starts_with(&prefix));
    if let Some(path) = reserved {
        return Err(StorageError::ReservedPath { path: path.clone() });
    }
    Ok(())
}

fn publish_blocking(root: &Path, changes: &Changeset) -> StorageResult<DeployCommit> {
    changes.validate()?;
    check_reserved(changes)?;

    let parent = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".pipewright-stage-")
        .tempdir_in(parent)?;

    if root.exists() {
        tree::copy_dir(root, staging.path(), &[])?;
    }

    for path in &changes.deletions {
        match std::fs::remove_file(staging.path().join(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    // A directory emptied by the deletions may now be replaced by a file.
    tree::prune_empty_dirs(staging.path())?;
    for (path, data) in &changes.writes {
        clear_write_path(staging.path(), path)?;
        let dest = staging.path().join(path);
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(dest, data)?;
    }
    tree::prune_empty_dirs(staging.path())?;

    let files = tree::read_tree(staging.path(), &[META_DIR])?;
    let mut history = read_history(staging.path())?;
    let commit = DeployCommit::record(&history, &files, &changes.message, changes.single_commit);
    extend_history(&mut history, commit.clone(), changes.single_commit);

    let meta = staging.path().join(META_DIR);
    std::fs::create_dir_all(&meta)?;
    std::fs::write(meta.join(HISTORY_FILE), serde_json::to_vec_pretty(&history)?)?;

    swap_into_place(root, staging.path())?;
    Ok(commit)
}

/// Make room for a write to `rel`: a file standing where a parent
/// directory must go, or a directory standing where the file must go, is
/// removed. The incoming tree wins.
fn clear_write_path(root: &Path, rel: &str) -> StorageResult<()> {
    let mut current = root.to_path_buf();
    let mut components = Path::new(rel).components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        let Ok(meta) = std::fs::symlink_metadata(&current) else {
            return Ok(());
        };
        let last = components.peek().is_none();
        if last && meta.is_dir() {
            debug!(path = %rel, "Replacing directory with file");
            std::fs::remove_dir_all(&current)?;
        } else if !last && !meta.is_dir() {
            debug!(path = %rel, "Replacing file with directory");
            std::fs::remove_file(&current)?;
            return Ok(());
        }
    }
    Ok(())
}

fn swap_into_place(root: &Path, staged: &Path) -> StorageResult<()> {
    if !root.exists() {
        std::fs::rename(staged, root)?;
        return Ok(());
    }

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    let backup = root.with_file_name(format!(".{}.pipewright-old", name));
    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }

    std::fs::rename(root, &backup)?;
    if let Err(e) = std::fs::rename(staged, root) {
        // Put the previous tree back before reporting the failure.
        std::fs::rename(&backup, root)?;
        return Err(e.into());
    }
    if let Err(e) = std::fs::remove_dir_all(&backup) {
        warn!(path = %backup.display(), error = %e, "Failed to remove previous deploy tree");
    }
    Ok(())
}

#[async_trait]
impl DeployTarget for FsDeployTarget {
    async fn list(&self) -> StorageResult<BTreeSet<String>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || list_published(&root)).await??;
        Ok(files.into_keys().collect())
    }

    async fn publish(&self, changes: Changeset) -> StorageResult<DeployCommit> {
        let root = self.root.clone();
        debug!(
            target_dir = %root.display(),
            writes = changes.writes.len(),
            deletions = changes.deletions.len(),
            "Publishing changeset"
        );
        let commit = tokio::task::spawn_blocking(move || publish_blocking(&root, &changes)).await??;
        info!(target_dir = %self.root.display(), commit = %commit.short_id(), "Deploy committed");
        Ok(commit)
    }

    async fn history(&self) -> StorageResult<Vec<DeployCommit>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || read_history(&root)).await?
    }
}
