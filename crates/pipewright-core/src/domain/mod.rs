//! Domain models for pipewright.
//!
//! Canonical definitions for the core entities:
//! - `PipelineDefinition`: triggers plus ordered job definitions
//! - `JobDefinition`: platform label, strategy, steps, cache and deploy
//! - `MatrixSpec`: ordered axes plus include records
//! - `Step`: an action or a command, optionally guarded by a `Condition`

pub mod condition;
pub mod error;
pub mod ordered;
pub mod pipeline;

pub use condition::{CompareOp, Condition, ExpressionContext, Reference};
pub use error::{PipewrightError, Result};
pub use ordered::OrderedMap;
pub use pipeline::{
    Axis, CacheSpec, DeploySpec, Event, EventType, JobDefinition, MatrixSpec,
    PipelineDefinition, Step, StepKind, Strategy, TriggerFilter,
};
