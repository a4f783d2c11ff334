//! pipewright core library
//!
//! The vendor-neutral pipeline model and the pure or storage-bound pieces of
//! a run:
//!
//! - [`trigger`]: does an event start a run?
//! - [`matrix`]: cross product of axes plus include metadata
//! - [`cache`]: fingerprint keys and restore/save around a job
//! - [`deploy`]: clean-sync planning and all-or-nothing publish
//!
//! Step execution and scheduling live in `pipewright-ci`.

pub mod cache;
pub mod config;
pub mod context;
pub mod deploy;
pub mod domain;
pub mod loader;
pub mod matrix;
pub mod telemetry;
pub mod trigger;

pub use cache::{compute_key, CacheEntry, CacheManager, RestoreOutcome};
pub use config::EngineConfig;
pub use context::{interpolate, JobContext, JobId};
pub use deploy::{
    plan as plan_deploy, ArtifactDeployer, DeployOutcome, DeployPlan, ExclusionSet,
    FsTargetResolver, TargetResolver,
};
pub use domain::{
    CacheSpec, Condition, DeploySpec, Event, EventType, JobDefinition, MatrixSpec,
    PipelineDefinition, PipewrightError, Result, Step, StepKind, Strategy, TriggerFilter,
};
pub use loader::{load_definition, parse_definition, validate, DefinitionFormat};
pub use matrix::{expand, expand_job, MatrixCombination, MatrixExpansion};
pub use trigger::{evaluate as evaluate_trigger, TriggerDecision};

pub use pipewright_state::{CacheKey, CacheStore, DeployCommit, DeployTarget};
