//! Typed error hierarchy for mare.
//!
//! Three enums cover the three failure domains:
//! - `StorageError`: artifact repository and execution ledger failures
//! - `RoleError`: a collaborator role could not produce usable output
//! - `PipelineError`: run-level failures surfaced by the executor

use thiserror::Error;

/// Errors from the artifact repository and execution ledger.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Parent artifact {id} not found")]
    ParentNotFound { id: String },

    #[error("Parent artifact {parent_id} already has a newer version")]
    VersionConflict { parent_id: String },

    #[error("Artifact {id} is referenced as a parent and cannot be deleted")]
    Referenced { id: String },

    #[error("Execution {id} is already recorded in the ledger")]
    DuplicateExecution { id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Failed to access content blob at {path}: {source}")]
    Blob {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode artifact content: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Recover the typed error a database closure raised, or wrap the
    /// underlying failure as [`StorageError::Database`].
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast::<StorageError>() {
            Ok(typed) => typed,
            Err(other) => StorageError::Database(other),
        }
    }
}

/// A role failed to perform an operation.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("{role} failed during {operation}: {message}")]
    Failed {
        role: String,
        operation: String,
        message: String,
    },

    #[error("{role} does not support {operation}")]
    Unsupported { role: String, operation: String },

    #[error("{role} returned no '{key}' output for {operation}")]
    MissingOutput {
        role: String,
        operation: String,
        key: String,
    },
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Pipeline timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
