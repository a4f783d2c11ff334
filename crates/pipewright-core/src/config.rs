//! Engine configuration.

use std::path::PathBuf;

/// Where the engine reads sources and keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Repository checkout that `checkout` copies and fingerprints are read from.
    pub source_dir: PathBuf,
    /// Root of the filesystem cache store.
    pub cache_dir: PathBuf,
    /// Parent of per-job workspaces. `None` uses temporary directories.
    pub work_root: Option<PathBuf>,
    /// Relative deploy targets resolve under this directory.
    pub deploy_root: PathBuf,
    /// Global cap on concurrently running job instances.
    pub max_parallel: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            cache_dir: PathBuf::from(".pipewright/cache"),
            work_root: None,
            deploy_root: PathBuf::from(".pipewright/deploy"),
            max_parallel: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PIPEWRIGHT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("PIPEWRIGHT_SOURCE_DIR") {
            config.source_dir = v.into();
        }
        if let Some(v) = lookup("PIPEWRIGHT_CACHE_DIR") {
            config.cache_dir = v.into();
        }
        if let Some(v) = lookup("PIPEWRIGHT_WORK_DIR") {
            config.work_root = Some(v.into());
        }
        if let Some(v) = lookup("PIPEWRIGHT_DEPLOY_ROOT") {
            config.deploy_root = v.into();
        }
        if let Some(v) = lookup("PIPEWRIGHT_MAX_PARALLEL") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => config.max_parallel = Some(n),
                _ => tracing::warn!(value = %v, "Ignoring invalid PIPEWRIGHT_MAX_PARALLEL"),
            }
        }
        config
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = Some(dir.into());
        self
    }
}
