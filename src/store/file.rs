//! File-backed store: `<dir>/<job-id>.json`.
//!
//! Job ids are restricted to a safe character set before they touch the
//! filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CreateOutcome, JobStore, apply_stage, apply_status};
use crate::error::StoreError;
use crate::job::{GenerationJob, JobError, JobStatus, StageResult};

/// Job store backed by one pretty-printed JSON file per job.
///
/// Writes are serialized through a single lock and land via write-to-temp +
/// rename, so readers never observe a half-written file.
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !job_id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidId(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }

    async fn read(&self, job_id: &str) -> Result<Option<GenerationJob>, StoreError> {
        let path = self.job_path(job_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, job: &GenerationJob) -> Result<(), StoreError> {
        let path = self.job_path(&job.id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn modify<F>(&self, job_id: &str, f: F) -> Result<GenerationJob, StoreError>
    where
        F: FnOnce(&mut GenerationJob) -> Result<(), StoreError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut job = self
            .read(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        f(&mut job)?;
        self.write(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create_job(&self, job: GenerationJob) -> Result<CreateOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read(&job.id).await?.is_some() {
            return Ok(CreateOutcome::AlreadyExists);
        }
        self.write(&job).await?;
        Ok(CreateOutcome::Created)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<GenerationJob>, StoreError> {
        self.read(job_id).await
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        expected: JobStatus,
        next: JobStatus,
        error: Option<JobError>,
    ) -> Result<GenerationJob, StoreError> {
        self.modify(job_id, |job| apply_status(job, expected, next, error))
            .await
    }

    async fn upsert_stage_result(&self, job_id: &str, result: StageResult) -> Result<(), StoreError> {
        self.modify(job_id, |job| apply_stage(job, result)).await?;
        Ok(())
    }
}
