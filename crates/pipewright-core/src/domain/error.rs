//! Domain-level error taxonomy for pipewright.
//!
//! Trigger mismatches and cache misses are ordinary outcomes and never show
//! up here.

use pipewright_state::StorageError;

/// pipewright domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PipewrightError {
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid condition `{expression}`: {reason}")]
    InvalidCondition { expression: String, reason: String },

    #[error("invalid exclusion pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unsupported definition format: {0}")]
    UnsupportedFormat(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("deploy failed: {0}")]
    Deploy(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipewright domain operations.
pub type Result<T> = std::result::Result<T, PipewrightError>;
