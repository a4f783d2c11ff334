//! Pipeline orchestration: trigger gate, matrix fan-out, fail-fast.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use pipewright_core::{
    evaluate_trigger, expand_job, Event, JobContext, JobDefinition, PipelineDefinition,
    TriggerDecision,
};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gate::{GateVerdict, RunGate};
use crate::job::{JobReport, JobRunner, JobStatus};

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub pipeline: String,
    pub event: Event,
    pub decision: TriggerDecision,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Job instances in declaration order, then matrix order.
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn triggered(&self) -> bool {
        self.decision.should_run()
    }

    pub fn verdict(&self) -> GateVerdict {
        RunGate::evaluate(self)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Reports of every instance of job definition `name`.
    pub fn job(&self, name: &str) -> Vec<&JobReport> {
        self.jobs.iter().filter(|j| j.id.job == name).collect()
    }
}

/// Runs every job instance of a pipeline concurrently.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    jobs: JobRunner,
    max_parallel: Option<usize>,
}

/// Limits above what tokio can count are no limit at all.
fn limit(permits: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(permits.clamp(1, Semaphore::MAX_PERMITS)))
}

async fn acquire(
    semaphore: Option<&Arc<Semaphore>>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    let semaphore = semaphore?.clone();
    tokio::select! {
        _ = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    }
}

impl PipelineRunner {
    pub fn new(jobs: JobRunner) -> Self {
        Self {
            jobs,
            max_parallel: None,
        }
    }

    /// Cap concurrently running job instances across the whole run.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.filter(|n| *n > 0);
        self
    }

    pub async fn run(&self, definition: &PipelineDefinition, event: &Event) -> RunReport {
        self.run_with_cancel(definition, event, CancellationToken::new())
            .await
    }

    /// Run the pipeline; cancelling `cancel` cancels every job that has not
    /// finished, the same way fail-fast does.
    pub async fn run_with_cancel(
        &self,
        definition: &PipelineDefinition,
        event: &Event,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let decision = evaluate_trigger(definition, event);

        let mut report = RunReport {
            run_id: run_id.clone(),
            pipeline: definition.name.clone(),
            event: event.clone(),
            decision,
            started_at,
            duration_ms: 0,
            jobs: Vec::new(),
        };

        if !decision.should_run() {
            info!(run_id = %run_id, pipeline = %definition.name, decision = ?decision, "Pipeline not triggered");
            return report;
        }
        info!(run_id = %run_id, pipeline = %definition.name, event = %event.kind, branch = %event.branch, "Starting pipeline run");

        let global = self.max_parallel.map(limit);
        let mut instances: Vec<(Arc<JobDefinition>, JobContext)> = Vec::new();
        let mut tasks = JoinSet::new();

        for (name, job) in definition.jobs.iter() {
            let job = Arc::new(job.clone());
            let expansion = expand_job(&job);
            if expansion.is_empty() {
                warn!(run_id = %run_id, job = %name, "Job matrix is empty; nothing to run");
                continue;
            }

            // Fail-fast scope is the instances of one job definition.
            let siblings = cancel.child_token();
            let local = job.strategy.max_parallel.map(limit);

            for combination in expansion.combinations {
                let ctx = JobContext::new(&definition.env, name, &job, combination);
                let index = instances.len();
                instances.push((job.clone(), ctx.clone()));

                let runner = self.jobs.clone();
                let job = job.clone();
                let token = siblings.clone();
                let local = local.clone();
                let global = global.clone();
                tasks.spawn(async move {
                    let _local = acquire(local.as_ref(), &token).await;
                    let _global = acquire(global.as_ref(), &token).await;
                    let report = runner.run(&job, &ctx, &token).await;
                    if report.status == JobStatus::Failed && report.required && job.strategy.fail_fast {
                        warn!(job = %ctx.id, "Job failed; cancelling sibling jobs");
                        token.cancel();
                    }
                    (index, report)
                });
            }
        }

        let mut slots: Vec<Option<JobReport>> = vec![None; instances.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, job_report)) => slots[index] = Some(job_report),
                Err(e) => error!(run_id = %run_id, error = %e, "Job task aborted"),
            }
        }

        report.jobs = slots
            .into_iter()
            .zip(instances)
            .map(|(slot, (job, ctx))| {
                slot.unwrap_or_else(|| {
                    JobReport::aborted(&ctx, &job, JobStatus::Failed, Some("job task aborted".to_string()))
                })
            })
            .collect();
        report.duration_ms = start.elapsed().as_millis() as u64;

        let verdict = report.verdict();
        info!(
            run_id = %run_id,
            passed = verdict.passed,
            succeeded = report.count(JobStatus::Succeeded),
            failed = report.count(JobStatus::Failed),
            cancelled = report.count(JobStatus::Cancelled),
            duration_ms = report.duration_ms,
            "Pipeline run finished"
        );
        report
    }
}
