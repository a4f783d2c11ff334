//! Job runner: one job instance from workspace to report.
//!
//! Order of work: prepare workspace, restore cache, run steps, deploy (only
//! after every step succeeded and only if cancellation has not fired), save
//! cache. Once a deploy starts it runs to completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use pipewright_core::{
    ArtifactDeployer, CacheManager, DeployOutcome, JobContext, JobDefinition, JobId,
    RestoreOutcome, TargetResolver,
};
use serde::Serialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::step::{StepDirs, StepRecord, StepRunner, StepStatus, StepsStatus};

/// Final status of a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    /// Stopped by fail-fast or run cancellation. Distinct from failed.
    Cancelled,
}

/// Cache lifecycle of a job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CacheStatus {
    NotConfigured,
    /// A fingerprint could not be read.
    Disabled,
    Hit { key: String, files: usize },
    Miss { key: String, saved: bool },
}

/// Report for one job instance.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub digest: String,
    pub platform: String,
    pub status: JobStatus,
    /// Whether this job's failure fails the run.
    pub required: bool,
    pub steps: Vec<StepRecord>,
    pub cache: CacheStatus,
    pub deploy: Option<DeployOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Report for a job that never got to run its steps.
    pub fn aborted(
        ctx: &JobContext,
        job: &JobDefinition,
        status: JobStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: ctx.id.clone(),
            digest: ctx.id.digest(),
            platform: ctx.platform.clone(),
            status,
            required: !job.continue_on_error,
            steps: job
                .steps
                .iter()
                .map(|s| StepRecord {
                    name: s.display_name(),
                    status: StepStatus::NotRun,
                    exit_code: None,
                    duration_ms: 0,
                    error: None,
                })
                .collect(),
            cache: CacheStatus::NotConfigured,
            deploy: None,
            error,
            duration_ms: 0,
        }
    }
}

/// Where job instances find sources and put workspaces.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub source_dir: PathBuf,
    /// `None` gives every job a fresh temporary directory.
    pub work_root: Option<PathBuf>,
}

enum Workspace {
    Dir(PathBuf),
    Temp(TempDir),
}

impl Workspace {
    fn path(&self) -> &Path {
        match self {
            Workspace::Dir(path) => path,
            Workspace::Temp(dir) => dir.path(),
        }
    }
}

/// Runs single job instances. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct JobRunner {
    steps: StepRunner,
    cache: Option<CacheManager>,
    targets: Arc<dyn TargetResolver>,
    settings: JobSettings,
}

impl JobRunner {
    pub fn new(
        steps: StepRunner,
        cache: Option<CacheManager>,
        targets: Arc<dyn TargetResolver>,
        settings: JobSettings,
    ) -> Self {
        Self {
            steps,
            cache,
            targets,
            settings,
        }
    }

    async fn prepare_workspace(&self, ctx: &JobContext) -> RunnerResult<Workspace> {
        match &self.settings.work_root {
            Some(root) => {
                let dir = root.join(ctx.id.slug());
                if tokio::fs::try_exists(&dir).await? {
                    tokio::fs::remove_dir_all(&dir).await?;
                }
                tokio::fs::create_dir_all(&dir).await?;
                Ok(Workspace::Dir(dir))
            }
            None => {
                let dir = tokio::task::spawn_blocking(|| {
                    tempfile::Builder::new().prefix("pipewright-job-").tempdir()
                })
                .await??;
                Ok(Workspace::Temp(dir))
            }
        }
    }

    /// Run one job instance to completion and report on it.
    pub async fn run(
        &self,
        job: &JobDefinition,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> JobReport {
        if cancel.is_cancelled() {
            info!(job = %ctx.id, "Job cancelled before start");
            return JobReport::aborted(ctx, job, JobStatus::Cancelled, None);
        }

        let start = Instant::now();
        info!(job = %ctx.id, platform = %ctx.platform, "Starting job");

        let workspace = match self.prepare_workspace(ctx).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(job = %ctx.id, error = %e, "Failed to prepare workspace");
                let err = RunnerError::Workspace(e.to_string());
                return JobReport::aborted(ctx, job, JobStatus::Failed, Some(err.to_string()));
            }
        };

        let entry = match (&self.cache, &job.cache) {
            (Some(manager), Some(spec)) => {
                let entry = manager
                    .open(spec, &ctx.platform, &self.settings.source_dir, workspace.path())
                    .await;
                Some((manager, entry))
            }
            _ => None,
        };

        let dirs = StepDirs {
            workspace: workspace.path(),
            source_dir: &self.settings.source_dir,
        };
        let outcome = self.steps.run(&job.steps, ctx, dirs, cancel).await;

        let mut status = match outcome.status {
            StepsStatus::Succeeded => JobStatus::Succeeded,
            StepsStatus::Failed => JobStatus::Failed,
            StepsStatus::Cancelled => JobStatus::Cancelled,
        };
        let mut error = outcome
            .records
            .iter()
            .find(|r| r.status == StepStatus::Failed)
            .map(|r| format!("step `{}` failed", r.name));

        let mut deploy = None;
        if let (JobStatus::Succeeded, Some(spec)) = (status, &job.deploy) {
            if cancel.is_cancelled() {
                info!(job = %ctx.id, "Job cancelled before deploy");
                status = JobStatus::Cancelled;
            } else {
                let deployer = ArtifactDeployer::new(self.targets.resolve(&spec.target));
                let source = workspace.path().join(&spec.source);
                match deployer.deploy(&source, spec).await {
                    Ok(done) => deploy = Some(done),
                    Err(e) => {
                        warn!(job = %ctx.id, error = %e, "Deploy failed");
                        status = JobStatus::Failed;
                        error = Some(e.to_string());
                    }
                }
            }
        }

        let cache = match entry {
            None => CacheStatus::NotConfigured,
            Some((_, None)) => CacheStatus::Disabled,
            Some((manager, Some(entry))) => {
                let saved = manager.close(&entry, status == JobStatus::Succeeded).await;
                match entry.outcome {
                    RestoreOutcome::Hit { files } => CacheStatus::Hit {
                        key: entry.key.to_string(),
                        files,
                    },
                    RestoreOutcome::Miss => CacheStatus::Miss {
                        key: entry.key.to_string(),
                        saved,
                    },
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(job = %ctx.id, status = ?status, duration_ms, "Job finished");

        JobReport {
            id: ctx.id.clone(),
            digest: ctx.id.digest(),
            platform: ctx.platform.clone(),
            status,
            required: !job.continue_on_error,
            steps: outcome.records,
            cache,
            deploy,
            error,
            duration_ms,
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("steps", &self.steps)
            .field("cached", &self.cache.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
