//! Artifact deployer.
//!
//! Planning is pure: given the source tree, the current target listing and a
//! [`DeploySpec`], [`plan`] decides what to write and what to delete. The
//! resulting changeset is handed to a [`DeployTarget`] in one `publish` call,
//! which either applies all of it or none of it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use pipewright_state::{read_tree, Changeset, DeployCommit, DeployTarget, FsDeployTarget, Tree};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{DeploySpec, PipewrightError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Paths that a clean deploy never deletes.
///
/// Entries are exact relative paths unless they contain `*`, `?` or `[`, in
/// which case they are glob patterns (`*` does not cross `/`; use `**`).
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    exact: BTreeSet<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionSet {
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = ExclusionSet::default();
        for entry in entries {
            let entry = entry.as_ref().trim_start_matches("./");
            if entry.contains(['*', '?', '[']) {
                let pattern = Pattern::new(entry).map_err(|e| PipewrightError::InvalidPattern {
                    pattern: entry.to_string(),
                    reason: e.msg.to_string(),
                })?;
                set.patterns.push(pattern);
            } else {
                set.exact.insert(entry.to_string());
            }
        }
        Ok(set)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exact.contains(path)
            || self
                .patterns
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

/// What a deploy will do to the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployPlan {
    pub writes: BTreeMap<String, Vec<u8>>,
    pub deletions: BTreeSet<String>,
    /// Target-only files kept because they are excluded from cleaning.
    pub preserved: BTreeSet<String>,
}

impl DeployPlan {
    pub fn into_changeset(self, message: impl Into<String>, single_commit: bool) -> Changeset {
        Changeset {
            writes: self.writes,
            deletions: self.deletions,
            message: message.into(),
            single_commit,
        }
    }
}

/// Compute the changes that bring `target` in line with `source`.
///
/// Every source file is written. With `clean`, target files absent from the
/// source are deleted unless excluded.
pub fn plan(
    source: &Tree,
    target: &BTreeSet<String>,
    clean: bool,
    exclusions: &ExclusionSet,
) -> DeployPlan {
    let mut plan = DeployPlan {
        writes: source.clone(),
        ..DeployPlan::default()
    };
    for path in target.iter().filter(|p| !source.contains_key(*p)) {
        if !clean {
            continue;
        }
        if exclusions.is_excluded(path) {
            plan.preserved.insert(path.clone());
        } else {
            plan.deletions.insert(path.clone());
        }
    }
    plan
}

/// Summary of a finished deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub commit: DeployCommit,
    pub written: usize,
    pub deleted: Vec<String>,
    pub preserved: Vec<String>,
}

/// Maps a `DeploySpec::target` name to a concrete target.
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, target: &str) -> Arc<dyn DeployTarget>;
}

/// Resolves relative target names under a root directory.
#[derive(Debug, Clone)]
pub struct FsTargetResolver {
    root: PathBuf,
}

impl FsTargetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TargetResolver for FsTargetResolver {
    fn resolve(&self, target: &str) -> Arc<dyn DeployTarget> {
        Arc::new(FsDeployTarget::new(self.root.join(target)))
    }
}

/// Every name resolves to the same target.
impl TargetResolver for Arc<dyn DeployTarget> {
    fn resolve(&self, _target: &str) -> Arc<dyn DeployTarget> {
        Arc::clone(self)
    }
}

/// Publishes a generated directory to a deploy target.
pub struct ArtifactDeployer {
    target: Arc<dyn DeployTarget>,
}

impl ArtifactDeployer {
    pub fn new(target: Arc<dyn DeployTarget>) -> Self {
        Self { target }
    }

    /// Sync `source_dir` into the target according to `spec`.
    ///
    /// On error the target keeps its last successfully published state.
    pub async fn deploy(&self, source_dir: &Path, spec: &DeploySpec) -> Result<DeployOutcome> {
        let exclusions = ExclusionSet::new(&spec.clean_exclude)?;
        if !source_dir.is_dir() {
            return Err(PipewrightError::Deploy(format!(
                "source directory {} does not exist",
                source_dir.display()
            )));
        }

        let root = source_dir.to_path_buf();
        let source = tokio::task::spawn_blocking(move || read_tree(&root, &[]))
            .await
            .map_err(|e| PipewrightError::Deploy(format!("reading source failed: {}", e)))??;
        let current = self.target.list().await?;

        let plan = plan(&source, &current, spec.clean, &exclusions);
        debug!(
            writes = plan.writes.len(),
            deletions = plan.deletions.len(),
            preserved = plan.preserved.len(),
            "Deploy planned"
        );

        let written = plan.writes.len();
        let deleted: Vec<String> = plan.deletions.iter().cloned().collect();
        let preserved: Vec<String> = plan.preserved.iter().cloned().collect();
        let message = spec
            .message
            .clone()
            .unwrap_or_else(|| format!("Deploy {} from {}", spec.target, spec.source));

        let commit = self
            .target
            .publish(plan.into_changeset(message, spec.single_commit))
            .await?;
        info!(
            deploy_target = %spec.target,
            commit = %commit.short_id(),
            written,
            deleted = deleted.len(),
            "Deployed artifacts"
        );

        Ok(DeployOutcome {
            commit,
            written,
            deleted,
            preserved,
        })
    }
}
