use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;
use crate::job::{ArtifactRef, JobStatus};

/// Top-level error for the binary and config loading.
#[derive(Debug, Error)]
pub enum CoursegenError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid outline: {0}")]
    Outline(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure classification persisted on stage results and job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input. Never retried.
    ValidationError,
    /// A downstream dependency is unavailable. Retried per policy.
    TransientError,
    /// Duplicate detected; resolved to the existing artifact.
    ConflictError,
    /// Job store or orchestrator failure. Aborts the run.
    SystemError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::TransientError => "transient_error",
            ErrorKind::ConflictError => "conflict_error",
            ErrorKind::SystemError => "system_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a content generator for a single attempt.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient error: {0}")]
    Transient(String),

    /// The artifact already exists; carries the reference of the existing one.
    #[error("conflict: artifact {} already exists", existing.artifact_id)]
    Conflict { existing: ArtifactRef },
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Validation(_) => ErrorKind::ValidationError,
            GenerationError::Transient(_) => ErrorKind::TransientError,
            GenerationError::Conflict { .. } => ErrorKind::ConflictError,
        }
    }
}

impl From<BackendError> for GenerationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { .. } => GenerationError::Validation(err.to_string()),
            other => GenerationError::Transient(other.to_string()),
        }
    }
}

/// Errors raised by a [`JobStore`](crate::store::JobStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid job id: {0:?}")]
    InvalidId(String),

    #[error("job {job_id} is {actual}, expected {expected}")]
    StatusConflict {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("stage result for node {node_id} is already terminal")]
    StageFrozen { node_id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced synchronously by the orchestrator entry point.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("caller is not authorized to trigger generation")]
    Unauthorized,

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error("job {0} already exists with a different outline or request")]
    PayloadMismatch(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("orchestration task for job {job_id} failed: {message}")]
    TaskFailed { job_id: String, message: String },
}

/// Delivery failure of a completion hook. Logged, never propagated.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Status(u16),

    #[error("completion channel closed")]
    ChannelClosed,
}
