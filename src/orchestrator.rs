//! Entry point for generation runs.
//!
//! [`CourseOrchestrator::start_orchestration`] claims a pending job, spawns
//! its run on a task tracker and returns at once. The run walks the outline
//! through a [`StageCoordinator`], records the terminal status and fires the
//! completion hook exactly once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, info_span, warn};

use crate::coordinator::{StageCoordinator, StageReporter};
use crate::error::{ErrorKind, OrchestratorError, StoreError};
use crate::generators::GeneratorSet;
use crate::job::{GenerationJob, GenerationRequest, JobError, JobStatus, RetryPolicy, StageResult};
use crate::notify::CompletionHook;
use crate::outline::Outline;
use crate::store::JobStore;

/// Knobs shared by every run started from one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Base retry policy; a request's overrides are applied on top.
    pub policy: RetryPolicy,
    /// Generator attempts allowed in flight across the whole job.
    pub max_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_concurrency: 4,
        }
    }
}

/// Everything a run needs, passed in explicitly.
#[derive(Clone)]
pub struct GenerationContext {
    pub store: Arc<dyn JobStore>,
    pub generators: GeneratorSet,
    pub hook: Arc<dyn CompletionHook>,
    pub settings: OrchestratorSettings,
}

/// What [`CourseOrchestrator::start_orchestration`] did.
#[derive(Debug)]
pub enum StartOutcome {
    /// A background run was spawned.
    Started(RunHandle),
    /// Another run owns this job; nothing was started.
    AlreadyInProgress,
    /// The job already reached a terminal status.
    AlreadyFinished(JobStatus),
}

impl StartOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOutcome::Started(_) => "started",
            StartOutcome::AlreadyInProgress => "already_in_progress",
            StartOutcome::AlreadyFinished(_) => "already_finished",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Handle to a detached run. Dropping it does not stop the run.
#[derive(Debug)]
pub struct RunHandle {
    job_id: String,
    handle: JoinHandle<GenerationJob>,
}

impl RunHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the run and return the job as handed to the completion hook.
    pub async fn wait(self) -> Result<GenerationJob, OrchestratorError> {
        self.handle
            .await
            .map_err(|e| OrchestratorError::TaskFailed {
                job_id: self.job_id,
                message: e.to_string(),
            })
    }
}

/// Persists each stage result as the coordinator reports it.
pub struct StoreReporter {
    store: Arc<dyn JobStore>,
    job_id: String,
}

impl StoreReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }
}

#[async_trait]
impl StageReporter for StoreReporter {
    async fn report(&self, result: &StageResult) -> Result<(), StoreError> {
        self.store
            .upsert_stage_result(&self.job_id, result.clone())
            .await
    }
}

/// Starts detached generation runs and keeps at most one per job.
pub struct CourseOrchestrator {
    ctx: GenerationContext,
    active: Arc<Mutex<HashSet<String>>>,
    tracker: TaskTracker,
}

impl CourseOrchestrator {
    pub fn new(ctx: GenerationContext) -> Self {
        Self {
            ctx,
            active: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn context(&self) -> &GenerationContext {
        &self.ctx
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        lock(&self.active).contains(job_id)
    }

    /// Move a pending job to `running` and generate it in the background.
    ///
    /// Returns as soon as the run is spawned. A job that is already running
    /// or finished is left alone and reported through [`StartOutcome`].
    /// After [`shutdown`](Self::shutdown) a start fails with
    /// [`OrchestratorError::ShuttingDown`] and the job stays `pending`.
    pub async fn start_orchestration(
        &self,
        job_id: &str,
        outline: Outline,
        request: GenerationRequest,
    ) -> Result<StartOutcome, OrchestratorError> {
        let job = self
            .ctx
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

        if self.tracker.is_closed() {
            warn!(job_id, "orchestrator shutting down, not starting");
            return Err(OrchestratorError::ShuttingDown);
        }
        if job.status.is_terminal() {
            info!(job_id, status = %job.status, "job already finished, not starting");
            return Ok(StartOutcome::AlreadyFinished(job.status));
        }
        if job.status == JobStatus::Running {
            info!(job_id, "job already running, not starting");
            return Ok(StartOutcome::AlreadyInProgress);
        }

        let Some(claim) = ActiveClaim::acquire(&self.active, job_id) else {
            info!(job_id, "run already starting in this process");
            return Ok(StartOutcome::AlreadyInProgress);
        };

        match self
            .ctx
            .store
            .update_job_status(job_id, JobStatus::Pending, JobStatus::Running, None)
            .await
        {
            Ok(_) => {}
            Err(StoreError::StatusConflict { actual, .. }) if actual.is_terminal() => {
                return Ok(StartOutcome::AlreadyFinished(actual));
            }
            Err(StoreError::StatusConflict { .. }) => return Ok(StartOutcome::AlreadyInProgress),
            Err(e) => return Err(e.into()),
        }

        info!(job_id, course = %outline.title, "orchestration started");
        let run = Run {
            ctx: self.ctx.clone(),
            job_id: job_id.to_string(),
            outline,
            request,
        };
        let span = info_span!("job", job_id);
        let handle = self.tracker.spawn(
            async move {
                let job = run.execute().await;
                drop(claim);
                job
            }
            .instrument(span),
        );

        Ok(StartOutcome::Started(RunHandle {
            job_id: job_id.to_string(),
            handle,
        }))
    }

    /// Stop accepting runs and wait for the spawned ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Membership in the active set, released on drop.
struct ActiveClaim {
    set: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl ActiveClaim {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, job_id: &str) -> Option<Self> {
        if !lock(set).insert(job_id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.job_id);
    }
}

struct Run {
    ctx: GenerationContext,
    job_id: String,
    outline: Outline,
    request: GenerationRequest,
}

impl Run {
    async fn execute(self) -> GenerationJob {
        if let Err(e) = self.outline.validate() {
            let error = JobError::new(ErrorKind::ValidationError, e.to_string());
            warn!(error = %error, "outline rejected");
            return self.finish(JobStatus::Failed, Some(error)).await;
        }

        let coordinator = StageCoordinator::new(
            self.ctx.generators.clone(),
            self.ctx.settings.policy.clone(),
            self.ctx.settings.max_concurrency,
        );
        let reporter = Arc::new(StoreReporter::new(self.ctx.store.clone(), &self.job_id));

        let outcome = match coordinator.run(&self.outline, &self.request, reporter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "run aborted");
                let error = JobError::new(ErrorKind::SystemError, e.to_string());
                return self.finish(JobStatus::Failed, Some(error)).await;
            }
        };
        info!(
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "all stages settled"
        );

        // The final status is derived from what the store holds.
        let status = match self.ctx.store.get_job(&self.job_id).await {
            Ok(Some(job)) => job.derive_outcome(&self.outline.required_nodes(&self.request)),
            Ok(None) => {
                let error = JobError::new(ErrorKind::SystemError, "job vanished from the store");
                return self.finish(JobStatus::Failed, Some(error)).await;
            }
            Err(e) => {
                let error = JobError::new(ErrorKind::SystemError, e.to_string());
                return self.finish(JobStatus::Failed, Some(error)).await;
            }
        };
        self.finish(status, None).await
    }

    /// Persist the terminal status, then fire the hook exactly once.
    async fn finish(&self, status: JobStatus, error: Option<JobError>) -> GenerationJob {
        let job = match self
            .ctx
            .store
            .mark_completed(&self.job_id, status, error.clone())
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, status = %status, "failed to persist final status");
                self.unpersisted_failure(&e).await
            }
        };

        info!(status = %job.status, "orchestration finished");
        self.ctx.hook.on_complete(&job).await;
        job
    }

    /// Best-effort view of a job whose terminal status could not be stored.
    async fn unpersisted_failure(&self, cause: &StoreError) -> GenerationJob {
        let mut job = match self.ctx.store.get_job(&self.job_id).await {
            Ok(Some(job)) => job,
            _ => GenerationJob::new(&self.job_id, self.outline.clone(), self.request.clone()),
        };
        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.error = Some(JobError::new(
            ErrorKind::SystemError,
            format!("failed to persist final status: {cause}"),
        ));
        job.started_at.get_or_insert(now);
        job.completed_at = Some(now);
        job.updated_at = now;
        job
    }
}
