//! pipewright CI - step, job and pipeline execution
//!
//! Provides the pipeline orchestrator that:
//! - Gates a run on its triggers
//! - Fans job definitions out over their matrices and runs them concurrently
//! - Executes steps in order through a command executor and built-in actions
//! - Restores and saves caches, deploys artifacts, and reports per job

pub mod actions;
pub mod error;
pub mod gate;
pub mod job;
pub mod pipeline;
pub mod runner;
pub mod step;
pub mod testing;

// Re-export key types
pub use actions::{Action, ActionInvocation, ActionRegistry};
pub use error::{RunnerError, RunnerResult};
pub use gate::{GateVerdict, RunGate};
pub use job::{CacheStatus, JobReport, JobRunner, JobSettings, JobStatus};
pub use pipeline::{PipelineRunner, RunReport};
pub use runner::{CommandExecutor, CommandOutput, CommandRequest, ShellExecutor};
pub use step::{StepDirs, StepRecord, StepRunner, StepStatus, StepsOutcome, StepsStatus};
