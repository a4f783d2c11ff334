//! File tree helpers shared by the filesystem backends.
//!
//! Trees are keyed by `/`-separated paths relative to their root so that
//! manifests and commit ids are identical across host platforms.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Relative path -> file content.
pub type Tree = BTreeMap<String, Vec<u8>>;

/// Read every file under `root` into memory.
///
/// Top-level directories named in `skip` are not descended into.
pub fn read_tree(root: &Path, skip: &[&str]) -> io::Result<Tree> {
    let mut tree = Tree::new();
    for path in list_files(root, skip)? {
        let content = std::fs::read(&path)?;
        tree.insert(relative_key(root, &path), content);
    }
    Ok(tree)
}

/// List every file under `root`, skipping the named top-level directories.
pub fn list_files(root: &Path, skip: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name();
            if skip.iter().any(|s| name.as_os_str() == *s) {
                continue;
            }
            walk(&path, &mut files)?;
        } else {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Copy the contents of `src` into `dst`, merging with whatever is there.
///
/// Returns the number of files copied.
pub fn copy_dir(src: &Path, dst: &Path, skip: &[&str]) -> io::Result<usize> {
    let files = list_files(src, skip)?;
    for file in &files {
        let target = dst.join(relative_key(src, file));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(file, &target)?;
    }
    Ok(files.len())
}

/// `/`-joined path of `path` relative to `root`.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject absolute paths, `..` segments and empty paths.
pub fn validate_relative(path: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidPath {
        path: path.to_string(),
    };
    if path.is_empty() {
        return Err(invalid());
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// Remove empty directories left behind under `root` (not `root` itself).
pub fn prune_empty_dirs(root: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            prune_empty_dirs(&path)?;
            if std::fs::read_dir(&path)?.next().is_none() {
                std::fs::remove_dir(&path)?;
            }
        }
    }
    Ok(())
}
