//! Walks an outline and drives one generator per node.
//!
//! Nodes run depth-first in outline order. A node's children are released
//! only after its own stage result has been persisted as succeeded; sibling
//! subtrees run concurrently, bounded by a shared semaphore that is held only
//! for the duration of a single generator attempt.

use std::ops::AddAssign;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{ErrorKind, GenerationError, StoreError};
use crate::generators::{Ancestry, GeneratorSet};
use crate::job::{ArtifactRef, GenerationRequest, JobError, RetryPolicy, StageResult};
use crate::outline::{Outline, OutlineNode};

/// Receives every stage result as soon as it changes.
///
/// The coordinator awaits each report before moving on, so a descendant is
/// never started before its parent's success has been reported.
#[async_trait]
pub trait StageReporter: Send + Sync {
    async fn report(&self, result: &StageResult) -> Result<(), StoreError>;
}

/// Aborts the whole walk. Node-level failures never surface here.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to persist stage result: {0}")]
    Report(#[from] StoreError),

    #[error("stage task failed: {0}")]
    Task(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Counts over every node the walk reached.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutcome {
    /// Nodes whose generator was invoked at least once.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Generator invocations across all nodes, retries included.
    pub total_attempts: u32,
}

impl AddAssign for AggregateOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.attempted += rhs.attempted;
        self.succeeded += rhs.succeeded;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
        self.total_attempts += rhs.total_attempts;
    }
}

/// Sequences generator invocations over an outline.
pub struct StageCoordinator {
    generators: GeneratorSet,
    policy: RetryPolicy,
    max_concurrency: usize,
}

impl StageCoordinator {
    pub fn new(generators: GeneratorSet, policy: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            generators,
            policy,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Generate every node of `outline` required by `request`.
    pub async fn run(
        &self,
        outline: &Outline,
        request: &GenerationRequest,
        reporter: Arc<dyn StageReporter>,
    ) -> Result<AggregateOutcome, CoordinatorError> {
        let walk = Arc::new(Walk {
            generators: self.generators.clone(),
            request: request.clone(),
            policy: self.policy.with_overrides(request.retry.as_ref()),
            reporter,
            permits: Semaphore::new(self.max_concurrency),
            cancel: CancellationToken::new(),
            failure: Mutex::new(None),
        });

        let paths: Vec<OutlineNode> = outline
            .ordered_paths()
            .into_iter()
            .filter(|p| p.is_required(request))
            .cloned()
            .collect();

        let result = run_siblings(walk.clone(), paths, Ancestry::root(&outline.course_id)).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(walk.take_failure().unwrap_or(err)),
        }
    }
}

enum NodeOutcome {
    Succeeded(ArtifactRef),
    Failed(JobError),
}

struct Walk {
    generators: GeneratorSet,
    request: GenerationRequest,
    policy: RetryPolicy,
    reporter: Arc<dyn StageReporter>,
    permits: Semaphore,
    cancel: CancellationToken,
    /// First error that aborted the walk; later tasks only see `Cancelled`.
    failure: Mutex<Option<CoordinatorError>>,
}

impl Walk {
    fn abort(&self, err: CoordinatorError) -> CoordinatorError {
        {
            let mut slot = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() && !matches!(err, CoordinatorError::Cancelled) {
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
        CoordinatorError::Cancelled
    }

    fn take_failure(&self) -> Option<CoordinatorError> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    async fn report(&self, result: &StageResult) -> Result<(), CoordinatorError> {
        if self.cancel.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        self.reporter
            .report(result)
            .await
            .map_err(|e| self.abort(CoordinatorError::Report(e)))
    }

    /// Run one node through the retry policy. Returns once its stage result
    /// is terminal and persisted.
    async fn run_node(
        &self,
        node: &OutlineNode,
        ancestry: &Ancestry,
    ) -> Result<(NodeOutcome, u32), CoordinatorError> {
        let generator = self.generators.for_type(node.node_type()).clone();
        let max_attempts = self.policy.attempts();
        let mut result = StageResult::running(node.id.clone(), node.node_type());
        self.report(&result).await?;

        loop {
            let attempt = result.attempts + 1;
            let outcome = {
                let _permit = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                    permit = self.permits.acquire() => {
                        permit.map_err(|_| CoordinatorError::Cancelled)?
                    }
                };
                debug!(attempt, max_attempts, "invoking generator");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                    r = timeout(self.policy.timeout(), generator.generate(ancestry, node, &self.request)) => r,
                }
            };

            let error = match outcome {
                Ok(Ok(artifact)) => {
                    info!(attempt, artifact_id = %artifact.artifact_id, "stage succeeded");
                    result.succeed(artifact.clone());
                    self.report(&result).await?;
                    return Ok((NodeOutcome::Succeeded(artifact), result.attempts));
                }
                Ok(Err(GenerationError::Conflict { existing })) => {
                    info!(attempt, artifact_id = %existing.artifact_id, "resolved to existing artifact");
                    result.succeed(existing.clone());
                    self.report(&result).await?;
                    return Ok((NodeOutcome::Succeeded(existing), result.attempts));
                }
                Ok(Err(e)) => JobError::new(e.kind(), e.to_string()),
                Err(_) => JobError::new(
                    ErrorKind::TransientError,
                    format!("generator timed out after {}ms", self.policy.timeout_ms),
                ),
            };

            if error.kind.is_retryable() && attempt < max_attempts {
                let delay = self.policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "stage attempt failed, retrying"
                );
                result.record_retry(error);
                self.report(&result).await?;
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                    _ = sleep(delay) => {}
                }
                continue;
            }

            warn!(attempt, error = %error, "stage failed permanently");
            result.fail(error.clone());
            self.report(&result).await?;
            return Ok((NodeOutcome::Failed(error), result.attempts));
        }
    }

    /// Record every required descendant of a failed node as skipped.
    async fn skip_descendants(
        &self,
        node: &OutlineNode,
        cause: &JobError,
    ) -> Result<usize, CoordinatorError> {
        let descendants = node.required_descendants(&self.request);
        if descendants.is_empty() {
            return Ok(0);
        }
        let reason = JobError::new(
            cause.kind,
            format!("ancestor {} {} failed", node.node_type(), node.id),
        );
        for d in &descendants {
            self.report(&StageResult::skipped(d.id.clone(), d.node_type(), reason.clone()))
                .await?;
        }
        info!(count = descendants.len(), "skipped descendants of failed stage");
        Ok(descendants.len())
    }
}

fn required_children(node: &OutlineNode, request: &GenerationRequest) -> Vec<OutlineNode> {
    node.ordered_children()
        .into_iter()
        .filter(|c| c.is_required(request))
        .cloned()
        .collect()
}

/// Run sibling subtrees concurrently, in outline order of submission.
fn run_siblings(
    walk: Arc<Walk>,
    nodes: Vec<OutlineNode>,
    ancestry: Ancestry,
) -> BoxFuture<'static, Result<AggregateOutcome, CoordinatorError>> {
    async move {
        let mut set = JoinSet::new();
        for node in nodes {
            set.spawn(run_subtree(walk.clone(), node, ancestry.clone()));
        }

        let mut total = AggregateOutcome::default();
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(walk.abort(CoordinatorError::Task(e.to_string()))),
            };
            match outcome {
                Ok(outcome) => total += outcome,
                Err(err) => {
                    walk.cancel.cancel();
                    set.abort_all();
                    return Err(err);
                }
            }
        }
        Ok(total)
    }
    .boxed()
}

/// Run one node, then either its children or their skip records.
fn run_subtree(
    walk: Arc<Walk>,
    node: OutlineNode,
    ancestry: Ancestry,
) -> BoxFuture<'static, Result<AggregateOutcome, CoordinatorError>> {
    let span = info_span!("stage", node_id = %node.id, node_type = %node.node_type());
    async move {
        let (outcome, attempts) = walk.run_node(&node, &ancestry).await?;
        let mut total = AggregateOutcome {
            attempted: 1,
            total_attempts: attempts,
            ..Default::default()
        };

        match outcome {
            NodeOutcome::Succeeded(artifact) => {
                total.succeeded += 1;
                let children = required_children(&node, &walk.request);
                if !children.is_empty() {
                    total += run_siblings(walk.clone(), children, ancestry.child(artifact)).await?;
                }
            }
            NodeOutcome::Failed(cause) => {
                total.failed += 1;
                total.skipped += walk.skip_descendants(&node, &cause).await?;
            }
        }
        Ok(total)
    }
    .instrument(span)
    .boxed()
}
