//! Completion hooks, invoked once per orchestration run with the final job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::NotifyError;
use crate::job::{AuditRecord, GenerationJob};

#[async_trait]
pub trait CompletionHook: Send + Sync {
    /// Called with the job as persisted in its terminal status.
    async fn on_complete(&self, job: &GenerationJob);
}

/// Writes a one-line summary through `tracing`.
pub struct LogHook;

#[async_trait]
impl CompletionHook for LogHook {
    async fn on_complete(&self, job: &GenerationJob) {
        let audit = AuditRecord::from_job(job);
        info!(
            job_id = %audit.job_id,
            status = %audit.status,
            succeeded = audit.succeeded,
            failed = audit.failed,
            skipped = audit.skipped,
            attempts = audit.total_attempts,
            duration_ms = audit.duration_ms,
            "generation job finished"
        );
    }
}

/// POSTs the final job and its audit record to a URL.
pub struct WebhookHook {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookHook {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: None,
        })
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn deliver(&self, job: &GenerationJob) -> Result<(), NotifyError> {
        let payload = json!({
            "event": "generation.completed",
            "job": job,
            "audit": AuditRecord::from_job(job),
        });
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionHook for WebhookHook {
    async fn on_complete(&self, job: &GenerationJob) {
        if let Err(e) = self.deliver(job).await {
            warn!(job_id = %job.id, url = %self.url, error = %e, "completion webhook failed");
        }
    }
}

/// Forwards the final job to an in-process receiver.
pub struct ChannelHook {
    tx: mpsc::Sender<GenerationJob>,
}

impl ChannelHook {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<GenerationJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CompletionHook for ChannelHook {
    async fn on_complete(&self, job: &GenerationJob) {
        if self.tx.send(job.clone()).await.is_err() {
            warn!(job_id = %job.id, error = %NotifyError::ChannelClosed, "dropping completion");
        }
    }
}

/// Runs several hooks in registration order.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CompletionHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[async_trait]
impl CompletionHook for HookChain {
    async fn on_complete(&self, job: &GenerationJob) {
        for hook in &self.hooks {
            hook.on_complete(job).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{GenerationRequest, JobStatus};
    use crate::outline::tests::sample_outline;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn finished_job() -> GenerationJob {
        let mut job = GenerationJob::new("job-7", sample_outline(), GenerationRequest::default());
        job.status = JobStatus::Completed;
        job
    }

    #[tokio::test]
    async fn webhook_posts_final_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/generation"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(json!({
                "event": "generation.completed",
                "job": { "id": "job-7", "status": "completed" },
                "audit": { "jobId": "job-7", "courseTitle": "Fractions" }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let hook = WebhookHook::new(format!("{}/hooks/generation", server.uri()))
            .unwrap()
            .with_bearer("s3cret");
        hook.deliver(&finished_job()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_failure_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let hook = WebhookHook::new(server.uri()).unwrap();
        let err = hook.deliver(&finished_job()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(500)));

        // The hook entry point swallows the failure.
        hook.on_complete(&finished_job()).await;
    }

    #[tokio::test]
    async fn chain_runs_every_hook_in_order() {
        let (first, mut rx1) = ChannelHook::new(1);
        let (second, mut rx2) = ChannelHook::new(1);
        let chain = HookChain::new()
            .with(Arc::new(LogHook))
            .with(Arc::new(first))
            .with(Arc::new(second));

        chain.on_complete(&finished_job()).await;
        assert_eq!(rx1.recv().await.unwrap().id, "job-7");
        assert_eq!(rx2.recv().await.unwrap().id, "job-7");
    }

    #[tokio::test]
    async fn closed_channel_does_not_panic() {
        let (hook, rx) = ChannelHook::new(1);
        drop(rx);
        hook.on_complete(&finished_job()).await;
    }
}
