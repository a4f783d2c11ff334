//! Error types for pipewright-state

use thiserror::Error;

/// Errors raised by cache stores and deploy targets.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Path escapes the storage root or is otherwise unusable
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// Path lives under the reserved metadata directory
    #[error("path is reserved for deploy metadata: {path}")]
    ReservedPath { path: String },

    /// The same path is both written and deleted in one changeset
    #[error("conflicting change for path: {path}")]
    ConflictingChange { path: String },

    /// Backend refused or failed the operation
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
