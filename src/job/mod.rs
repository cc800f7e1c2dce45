//! Job records and the parameters they run with.

mod job;
mod request;
mod state;

pub use job::{
    ArtifactRef, AttemptRecord, AuditRecord, GenerationJob, JobError, JobStatus, NodeType,
    StageResult, StageStatus,
};
pub use request::{Backoff, GenerationRequest, RetryOverrides, RetryPolicy};
pub use state::StatusMachine;
