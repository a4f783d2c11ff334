//! Cache manager: key computation plus restore/save around a job.
//!
//! Cache trouble of any kind (store errors, unreadable fingerprints, corrupt
//! archives) is logged and degrades to a miss or a skipped save. It never
//! fails the job.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pipewright_state::{validate_relative, CacheKey, CacheStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::domain::{CacheSpec, Result};

/// Deterministic key over the platform, prefix and fingerprint contents.
///
/// Each input is length-prefixed so that moving bytes between inputs always
/// changes the digest.
pub fn compute_key(platform: &str, prefix: &str, inputs: &[&[u8]]) -> CacheKey {
    let mut hasher = Sha256::new();
    for part in [platform.as_bytes(), prefix.as_bytes()]
        .into_iter()
        .chain(inputs.iter().copied())
    {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    CacheKey::new(format!(
        "{}-{}-{}",
        platform,
        prefix,
        hex::encode(hasher.finalize())
    ))
}

/// Pack the directory at `root` into a gzipped tar stream.
///
/// Returns the archive and the number of regular files in it. Headers carry
/// the full metadata, so file modes and mtimes come back on restore.
fn pack(root: &Path) -> io::Result<(Vec<u8>, usize)> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let files = append_tree(&mut builder, root, root)?;
    let bytes = builder.into_inner()?.finish()?;
    Ok((bytes, files))
}

fn append_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path, dir: &Path) -> io::Result<usize> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut files = 0;
    for entry in entries {
        let path = entry.path();
        let name = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if entry.file_type()?.is_dir() {
            builder.append_dir(name, &path)?;
            files += append_tree(builder, root, &path)?;
        } else {
            builder.append_path_with_name(&path, name)?;
            files += 1;
        }
    }
    Ok(files)
}

/// Unpack a cache archive over `dest`.
///
/// Entries land in a staging directory beside `dest`; `dest` is replaced
/// only once the whole archive unpacked cleanly.
fn unpack(bytes: &[u8], dest: &Path) -> Result<usize> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".pipewright-restore-")
        .tempdir_in(parent)?;

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.set_preserve_permissions(true);
    let mut files = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        validate_relative(&path)?;
        if entry.header().entry_type().is_file() {
            files += 1;
        }
        entry.unpack_in(staging.path())?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o755))?;
    }

    if dest.is_dir() {
        std::fs::remove_dir_all(dest)?;
    } else if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    std::fs::rename(staging.path(), dest)?;
    Ok(files)
}

/// Result of a restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RestoreOutcome {
    Hit { files: usize },
    Miss,
}

impl RestoreOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, RestoreOutcome::Hit { .. })
    }
}

/// A cache bound to one job execution, from `open` to `close`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub outcome: RestoreOutcome,
}

/// Restores and saves cache paths through a [`CacheStore`].
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Compute the job's key from fingerprint files under `source_dir`.
    ///
    /// Returns `None`, and the job runs uncached, when a fingerprint cannot
    /// be read.
    pub async fn resolve_key(
        &self,
        spec: &CacheSpec,
        platform: &str,
        source_dir: &Path,
    ) -> Option<CacheKey> {
        let mut contents = Vec::with_capacity(spec.fingerprints.len());
        for fingerprint in &spec.fingerprints {
            let path = source_dir.join(fingerprint);
            match tokio::fs::read(&path).await {
                Ok(bytes) => contents.push(bytes),
                Err(e) => {
                    warn!(
                        fingerprint = %path.display(),
                        error = %e,
                        "Cannot read cache fingerprint; caching disabled for this job"
                    );
                    return None;
                }
            }
        }
        let inputs: Vec<&[u8]> = contents.iter().map(Vec::as_slice).collect();
        Some(compute_key(platform, &spec.key_prefix, &inputs))
    }

    /// Restore `key` into `path`. A miss leaves `path` untouched.
    pub async fn restore(&self, path: &Path, key: &CacheKey) -> RestoreOutcome {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return RestoreOutcome::Miss;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed; treating as miss");
                return RestoreOutcome::Miss;
            }
        };

        let dest = path.to_path_buf();
        let unpacked = tokio::task::spawn_blocking(move || unpack(&bytes, &dest)).await;
        match unpacked {
            Ok(Ok(files)) => {
                info!(key = %key, files, "Cache hit");
                RestoreOutcome::Hit { files }
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Corrupt cache entry; treating as miss");
                RestoreOutcome::Miss
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache unpack task failed; treating as miss");
                RestoreOutcome::Miss
            }
        }
    }

    /// Archive `path` under `key`. Returns whether anything was stored.
    pub async fn save(&self, path: &Path, key: &CacheKey) -> bool {
        if !path.is_dir() {
            debug!(key = %key, path = %path.display(), "Nothing to cache");
            return false;
        }
        let root = path.to_path_buf();
        let (bytes, files) = match tokio::task::spawn_blocking(move || pack(&root)).await {
            Ok(Ok(packed)) => packed,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to archive cache path; skipping save");
                return false;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache archive task failed; skipping save");
                return false;
            }
        };

        match self.store.put(key, &bytes).await {
            Ok(()) => {
                info!(key = %key, files, bytes = bytes.len(), "Cache saved");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache save failed");
                false
            }
        }
    }

    /// Resolve the key and restore `spec.path` inside `workspace`.
    pub async fn open(
        &self,
        spec: &CacheSpec,
        platform: &str,
        source_dir: &Path,
        workspace: &Path,
    ) -> Option<CacheEntry> {
        let key = self.resolve_key(spec, platform, source_dir).await?;
        let path = workspace.join(&spec.path);
        let outcome = self.restore(&path, &key).await;
        Some(CacheEntry { key, path, outcome })
    }

    /// Save the entry if the job succeeded and the restore missed.
    pub async fn close(&self, entry: &CacheEntry, job_succeeded: bool) -> bool {
        if !job_succeeded || entry.outcome.is_hit() {
            return false;
        }
        self.save(&entry.path, &entry.key).await
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}
