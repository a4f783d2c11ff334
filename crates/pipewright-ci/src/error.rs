//! Runner errors.
//!
//! These are infrastructure failures (a process could not be spawned, a
//! workspace could not be prepared). A command that runs and exits non-zero
//! is a step failure and is reported, not raised.

use pipewright_core::PipewrightError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("action `{action}`: {reason}")]
    Action { action: String, reason: String },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error(transparent)]
    Core(#[from] PipewrightError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
