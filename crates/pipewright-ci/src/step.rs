//! Step runner: executes one job's steps in order.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use pipewright_core::{JobContext, Step, StepKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::{ActionInvocation, ActionRegistry};
use crate::error::RunnerResult;
use crate::runner::{CommandExecutor, CommandOutput, CommandRequest};

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Condition evaluated false.
    Skipped,
    /// Never reached: an earlier step failed or the job was cancelled.
    NotRun,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl StepRecord {
    fn not_run(step: &Step) -> Self {
        Self {
            name: step.display_name(),
            status: StepStatus::NotRun,
            exit_code: None,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Overall result of a step sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepsStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StepsOutcome {
    pub status: StepsStatus,
    pub records: Vec<StepRecord>,
}

/// Directories a job's steps operate on.
#[derive(Debug, Clone, Copy)]
pub struct StepDirs<'a> {
    pub workspace: &'a Path,
    pub source_dir: &'a Path,
}

/// Runs steps through the command executor and the action registry.
#[derive(Clone)]
pub struct StepRunner {
    executor: Arc<dyn CommandExecutor>,
    actions: Arc<ActionRegistry>,
}

impl StepRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, actions: Arc<ActionRegistry>) -> Self {
        Self { executor, actions }
    }

    /// Execute `steps` strictly in order.
    ///
    /// A step whose condition is false is skipped. The first failing step
    /// stops the job; the rest are recorded as not run. `cancel` is checked
    /// before each step and never interrupts a step that already started.
    pub async fn run(
        &self,
        steps: &[Step],
        ctx: &JobContext,
        dirs: StepDirs<'_>,
        cancel: &CancellationToken,
    ) -> StepsOutcome {
        let mut records = Vec::with_capacity(steps.len());
        let mut status = StepsStatus::Succeeded;

        for step in steps {
            if status != StepsStatus::Succeeded {
                records.push(StepRecord::not_run(step));
                continue;
            }
            if cancel.is_cancelled() {
                info!(job = %ctx.id, "Job cancelled before step {}", step.display_name());
                status = StepsStatus::Cancelled;
                records.push(StepRecord::not_run(step));
                continue;
            }

            let record = self.run_step(step, ctx, dirs).await;
            if record.status == StepStatus::Failed {
                status = StepsStatus::Failed;
            }
            records.push(record);
        }

        StepsOutcome { status, records }
    }

    async fn run_step(&self, step: &Step, ctx: &JobContext, dirs: StepDirs<'_>) -> StepRecord {
        let name = step.display_name();
        if let Some(condition) = &step.condition {
            if !condition.evaluate(ctx) {
                info!(job = %ctx.id, step = %name, "Step skipped by condition");
                return StepRecord {
                    name,
                    status: StepStatus::Skipped,
                    exit_code: None,
                    duration_ms: 0,
                    error: None,
                };
            }
        }

        info!(job = %ctx.id, step = %name, "Executing step");
        let start = Instant::now();
        let result = self.execute(step, ctx, dirs).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) if output.success() => StepRecord {
                name,
                status: StepStatus::Succeeded,
                exit_code: Some(output.exit_code),
                duration_ms,
                error: None,
            },
            Ok(output) => {
                warn!(job = %ctx.id, step = %name, exit_code = output.exit_code, "Step failed");
                let error = output
                    .last_error_line()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("exited with code {}", output.exit_code));
                StepRecord {
                    name,
                    status: StepStatus::Failed,
                    exit_code: Some(output.exit_code),
                    duration_ms,
                    error: Some(error),
                }
            }
            Err(e) => {
                warn!(job = %ctx.id, step = %name, error = %e, "Step could not run");
                StepRecord {
                    name,
                    status: StepStatus::Failed,
                    exit_code: None,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &JobContext,
        dirs: StepDirs<'_>,
    ) -> RunnerResult<CommandOutput> {
        let env = ctx.step_env(step);
        match &step.kind {
            StepKind::Command { run } => {
                let request = CommandRequest {
                    command: ctx.interpolate(run),
                    working_dir: dirs.workspace.to_path_buf(),
                    env,
                };
                self.executor.execute(&request).await
            }
            StepKind::Action { uses, with } => {
                let action = self.actions.get(uses)?;
                let with: BTreeMap<String, String> = with
                    .iter()
                    .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
                    .collect();
                let invocation = ActionInvocation {
                    with: &with,
                    env: &env,
                    workspace: dirs.workspace,
                    source_dir: dirs.source_dir,
                    executor: self.executor.as_ref(),
                };
                action.run(&invocation).await
            }
        }
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}
