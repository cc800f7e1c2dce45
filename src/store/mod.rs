//! Durable record of generation jobs and their stage results.
//!
//! The orchestrator is the only writer for a running job; pollers read
//! through [`JobStore::get_job`].

mod file;
mod memory;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::job::{GenerationJob, JobError, JobStatus, StageResult, StatusMachine};

pub use file::FileJobStore;
pub use memory::InMemoryJobStore;

/// Result of [`JobStore::create_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A job with this id already exists and was left untouched.
    AlreadyExists,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Never overwrites an existing id.
    async fn create_job(&self, job: GenerationJob) -> Result<CreateOutcome, StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<GenerationJob>, StoreError>;

    /// Compare-and-set the job status: fails with
    /// [`StoreError::StatusConflict`] unless the current status is `expected`.
    async fn update_job_status(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
        error: Option<JobError>,
    ) -> Result<GenerationJob, StoreError>;

    /// Insert or replace the stage result for `result.node_id`.
    async fn upsert_stage_result(&self, job_id: &str, result: StageResult) -> Result<(), StoreError>;

    /// Move a running job into a terminal status.
    async fn mark_completed(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<JobError>,
    ) -> Result<GenerationJob, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: JobStatus::Running,
                to: status,
            });
        }
        self.update_job_status(job_id, JobStatus::Running, status, error)
            .await
    }
}

pub(crate) fn apply_status(
    job: &mut GenerationJob,
    expected: JobStatus,
    next: JobStatus,
    error: Option<JobError>,
) -> Result<(), StoreError> {
    if job.status != expected {
        return Err(StoreError::StatusConflict {
            job_id: job.id.clone(),
            expected,
            actual: job.status,
        });
    }
    StatusMachine::transition(job, next, error)
}

pub(crate) fn apply_stage(job: &mut GenerationJob, result: StageResult) -> Result<(), StoreError> {
    if job.status != JobStatus::Running {
        return Err(StoreError::StatusConflict {
            job_id: job.id.clone(),
            expected: JobStatus::Running,
            actual: job.status,
        });
    }
    if let Some(existing) = job.stage_results.get(&result.node_id)
        && existing.status.is_terminal()
    {
        return Err(StoreError::StageFrozen {
            node_id: result.node_id,
        });
    }
    job.updated_at = Utc::now();
    job.stage_results.insert(result.node_id.clone(), result);
    Ok(())
}
