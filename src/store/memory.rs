//! In-process store, used by tests and the `demo` command.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CreateOutcome, JobStore, apply_stage, apply_status};
use crate::error::StoreError;
use crate::job::{GenerationJob, JobError, JobStatus, StageResult};

/// Job store kept in process memory.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, GenerationJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: GenerationJob) -> Result<CreateOutcome, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        jobs.insert(job.id.clone(), job);
        Ok(CreateOutcome::Created)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
        error: Option<JobError>,
    ) -> Result<GenerationJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        apply_status(job, expected, next, error)?;
        Ok(job.clone())
    }

    async fn upsert_stage_result(&self, job_id: &str, result: StageResult) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        apply_stage(job, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ArtifactRef, GenerationRequest, NodeType};
    use crate::outline::tests::sample_outline;

    fn job(id: &str) -> GenerationJob {
        GenerationJob::new(id, sample_outline(), GenerationRequest::default())
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = InMemoryJobStore::new();
        assert_eq!(store.create_job(job("a")).await.unwrap(), CreateOutcome::Created);

        let mut other = job("a");
        other.outline.title = "Overwritten".into();
        assert_eq!(
            store.create_job(other).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        let stored = store.get_job("a").await.unwrap().unwrap();
        assert_eq!(stored.outline.title, "Fractions");
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = InMemoryJobStore::new();
        store.create_job(job("a")).await.unwrap();

        let running = store
            .update_job_status("a", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(running.status, JobStatus::Running);

        let err = store
            .update_job_status("a", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StatusConflict {
                actual: JobStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stage_results_are_read_after_write() {
        let store = InMemoryJobStore::new();
        store.create_job(job("a")).await.unwrap();
        store
            .update_job_status("a", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();

        let mut result = StageResult::running("path-1", NodeType::Path);
        store.upsert_stage_result("a", result.clone()).await.unwrap();
        assert_eq!(
            store.get_job("a").await.unwrap().unwrap().stage("path-1").unwrap().attempts,
            0
        );

        result.succeed(ArtifactRef::new("path-1", NodeType::Path, "art"));
        store.upsert_stage_result("a", result.clone()).await.unwrap();
        let stored = store.get_job("a").await.unwrap().unwrap();
        assert_eq!(stored.stage("path-1"), Some(&result));
    }

    #[tokio::test]
    async fn terminal_stage_results_are_frozen() {
        let store = InMemoryJobStore::new();
        store.create_job(job("a")).await.unwrap();
        store
            .update_job_status("a", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();

        let mut result = StageResult::running("path-1", NodeType::Path);
        result.succeed(ArtifactRef::new("path-1", NodeType::Path, "art"));
        store.upsert_stage_result("a", result).await.unwrap();

        let err = store
            .upsert_stage_result("a", StageResult::running("path-1", NodeType::Path))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StageFrozen { .. }));
    }

    #[tokio::test]
    async fn stage_writes_require_running_job() {
        let store = InMemoryJobStore::new();
        store.create_job(job("a")).await.unwrap();
        let err = store
            .upsert_stage_result("a", StageResult::running("path-1", NodeType::Path))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { .. }));
    }

    #[tokio::test]
    async fn mark_completed_requires_terminal_status() {
        let store = InMemoryJobStore::new();
        store.create_job(job("a")).await.unwrap();
        store
            .update_job_status("a", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();

        let err = store
            .mark_completed("a", JobStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let done = store
            .mark_completed("a", JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        assert!(store.get_job("nope").await.unwrap().is_none());
        let err = store
            .update_job_status("nope", JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
