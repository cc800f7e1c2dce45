//! Acknowledgement contract for the trigger endpoint.
//!
//! A privileged caller submits a job; the reply comes back as soon as the
//! job is persisted and its run is spawned, never after generation.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::job::{GenerationJob, GenerationRequest};
use crate::orchestrator::{CourseOrchestrator, StartOutcome};
use crate::outline::Outline;
use crate::store::CreateOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: String,
    pub outline: Outline,
    #[serde(default)]
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    AlreadyInProgress,
    AlreadyFinished,
}

impl From<&StartOutcome> for TriggerOutcome {
    fn from(outcome: &StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started(_) => TriggerOutcome::Started,
            StartOutcome::AlreadyInProgress => TriggerOutcome::AlreadyInProgress,
            StartOutcome::AlreadyFinished(_) => TriggerOutcome::AlreadyFinished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAck {
    pub success: bool,
    pub job_id: String,
    pub outcome: TriggerOutcome,
}

/// Accept a trigger from a service caller.
///
/// `service_token` is the configured secret and `presented` the caller's
/// credential. An unset secret rejects every caller. Re-triggering an
/// existing job is accepted only with the payload it was created with.
pub async fn accept_trigger(
    orchestrator: &CourseOrchestrator,
    service_token: &str,
    presented: Option<&str>,
    trigger: TriggerRequest,
) -> Result<TriggerAck, OrchestratorError> {
    let authorized = match presented {
        Some(token) if !service_token.is_empty() => {
            constant_time_eq(token.as_bytes(), service_token.as_bytes())
        }
        _ => false,
    };
    if !authorized {
        return Err(OrchestratorError::Unauthorized);
    }

    let TriggerRequest {
        job_id,
        outline,
        request,
    } = trigger;

    let store = &orchestrator.context().store;
    let job = GenerationJob::new(job_id.clone(), outline, request);
    let (outline, request) = match store.create_job(job.clone()).await? {
        CreateOutcome::Created => (job.outline, job.request),
        CreateOutcome::AlreadyExists => {
            let stored = store
                .get_job(&job_id)
                .await?
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.clone()))?;
            if stored.outline != job.outline || stored.request != job.request {
                warn!(job_id = %job_id, "trigger payload differs from the stored job");
                return Err(OrchestratorError::PayloadMismatch(job_id));
            }
            info!(job_id = %job_id, "job already exists, reusing it");
            (stored.outline, stored.request)
        }
    };

    // The run handle is dropped; the run keeps going on its own.
    let started = orchestrator
        .start_orchestration(&job_id, outline, request)
        .await?;

    Ok(TriggerAck {
        success: true,
        outcome: TriggerOutcome::from(&started),
        job_id,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::InMemoryContentBackend;
    use crate::generators::GeneratorSet;
    use crate::job::JobStatus;
    use crate::notify::ChannelHook;
    use crate::orchestrator::{GenerationContext, OrchestratorSettings};
    use crate::outline::tests::sample_outline;
    use crate::store::{InMemoryJobStore, JobStore};
    use tokio::sync::mpsc;

    fn orchestrator() -> (CourseOrchestrator, Arc<InMemoryJobStore>, mpsc::Receiver<GenerationJob>) {
        let store = Arc::new(InMemoryJobStore::new());
        let (hook, rx) = ChannelHook::new(4);
        let ctx = GenerationContext {
            store: store.clone(),
            generators: GeneratorSet::from_backend(Arc::new(InMemoryContentBackend::new())),
            hook: Arc::new(hook),
            settings: OrchestratorSettings::default(),
        };
        (CourseOrchestrator::new(ctx), store, rx)
    }

    fn trigger(job_id: &str) -> TriggerRequest {
        TriggerRequest {
            job_id: job_id.into(),
            outline: sample_outline(),
            request: GenerationRequest::default(),
        }
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let (orch, store, _rx) = orchestrator();
        for presented in [None, Some("nope"), Some("")] {
            let err = accept_trigger(&orch, "svc-token", presented, trigger("job-1"))
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::Unauthorized));
        }
        let err = accept_trigger(&orch, "", Some(""), trigger("job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized));
        assert!(store.get_job("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acknowledges_then_runs_in_background() {
        let (orch, store, mut rx) = orchestrator();
        let ack = accept_trigger(&orch, "svc-token", Some("svc-token"), trigger("job-1"))
            .await
            .unwrap();
        assert_eq!(
            ack,
            TriggerAck {
                success: true,
                job_id: "job-1".into(),
                outcome: TriggerOutcome::Started,
            }
        );

        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        let stored = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(stored.stage_results.len(), 7);
    }

    #[tokio::test]
    async fn repeated_trigger_does_not_start_twice() {
        let (orch, _store, mut rx) = orchestrator();
        accept_trigger(&orch, "t", Some("t"), trigger("job-9"))
            .await
            .unwrap();
        let again = accept_trigger(&orch, "t", Some("t"), trigger("job-9"))
            .await
            .unwrap();
        assert_ne!(again.outcome, TriggerOutcome::Started);

        rx.recv().await.unwrap();
        orch.shutdown().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn retrigger_with_different_payload_is_rejected() {
        let (orch, store, mut rx) = orchestrator();
        let mut first = trigger("job-4");
        first.request.grade_level = Some("4".into());
        accept_trigger(&orch, "t", Some("t"), first).await.unwrap();
        let finished = rx.recv().await.unwrap();

        let mut changed = trigger("job-4");
        changed.request.grade_level = Some("9".into());
        let err = accept_trigger(&orch, "t", Some("t"), changed)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PayloadMismatch(id) if id == "job-4"));

        let mut retitled = trigger("job-4");
        retitled.request.grade_level = Some("4".into());
        retitled.outline.title = "Something else".into();
        let err = accept_trigger(&orch, "t", Some("t"), retitled)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PayloadMismatch(_)));

        let stored = store.get_job("job-4").await.unwrap().unwrap();
        assert_eq!(stored.request.grade_level.as_deref(), Some("4"));
        assert_eq!(stored.completed_at, finished.completed_at);
    }

    #[tokio::test]
    async fn pending_job_is_started_from_its_stored_payload() {
        let (orch, store, mut rx) = orchestrator();
        let job = GenerationJob::new("job-5", sample_outline(), GenerationRequest::default());
        store.create_job(job).await.unwrap();

        let ack = accept_trigger(&orch, "t", Some("t"), trigger("job-5"))
            .await
            .unwrap();
        assert_eq!(ack.outcome, TriggerOutcome::Started);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn trigger_request_uses_camel_case() {
        let json = serde_json::json!({
            "jobId": "job-3",
            "outline": {
                "courseId": "c-1",
                "title": "Fractions",
                "paths": [{ "id": "p-1", "title": "Basics", "index": 1, "type": "path" }]
            }
        });
        let parsed: TriggerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.job_id, "job-3");
        assert!(parsed.request.include_assessments);

        let ack = TriggerAck {
            success: true,
            job_id: "job-3".into(),
            outcome: TriggerOutcome::AlreadyInProgress,
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["jobId"], "job-3");
        assert_eq!(value["outcome"], "already_in_progress");
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
