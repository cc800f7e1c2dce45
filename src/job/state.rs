//! Job status transitions.

use chrono::Utc;

use super::job::{GenerationJob, JobError, JobStatus};
use crate::error::StoreError;

/// Applies job-level status transitions.
///
/// Transitions are monotonic: `Pending -> Running` and
/// `Running -> {Completed, PartiallyFailed, Failed}`. A terminal status is
/// never left again.
pub struct StatusMachine;

impl StatusMachine {
    /// Whether `from -> to` is a legal transition.
    pub fn allows(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Running)
                | (
                    JobStatus::Running,
                    JobStatus::Completed | JobStatus::PartiallyFailed | JobStatus::Failed
                )
        )
    }

    /// Move `job` to `to`, stamping `started_at`/`completed_at` as needed.
    pub fn transition(
        job: &mut GenerationJob,
        to: JobStatus,
        error: Option<JobError>,
    ) -> Result<(), StoreError> {
        if !Self::allows(job.status, to) {
            return Err(StoreError::InvalidTransition {
                from: job.status,
                to,
            });
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if to == JobStatus::Running {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        if error.is_some() {
            job.error = error;
        }
        Ok(())
    }
}
