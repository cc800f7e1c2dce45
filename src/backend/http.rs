use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::error::BackendError;
use super::types::{ArtifactDraft, StoredArtifact};
use super::ContentBackend;
use crate::job::{ArtifactRef, NodeType};

/// Content backend reached over HTTP.
///
/// `GET {base}/artifacts/{type}/{node_id}` looks an artifact up by natural
/// key, `POST {base}/artifacts` creates one. Path segments are
/// percent-encoded, so any node id maps to exactly one resource.
pub struct HttpContentBackend {
    api_key: String,
    client: Client,
    base_url: Url,
}

impl HttpContentBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url));
        }
        Ok(Self {
            api_key: api_key.into(),
            client,
            base_url: parsed,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn classify(response: reqwest::Response, node_id: &str) -> BackendError {
        let status = response.status();

        if status == StatusCode::CONFLICT {
            return BackendError::Conflict {
                node_id: node_id.to_string(),
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return BackendError::RateLimited {
                retry_after_ms: retry_after,
            };
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        if status.is_client_error() {
            BackendError::Rejected {
                status: status.as_u16(),
                message,
            }
        } else {
            BackendError::Unavailable(format!("status {}: {message}", status.as_u16()))
        }
    }
}

#[async_trait]
impl ContentBackend for HttpContentBackend {
    async fn find_artifact(
        &self,
        node_type: NodeType,
        node_id: &str,
    ) -> Result<Option<ArtifactRef>, BackendError> {
        let url = self.endpoint(&["artifacts", node_type.as_str(), node_id])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::classify(response, node_id).await);
        }

        let stored = response.json::<StoredArtifact>().await?;
        if stored.node_id != node_id || stored.node_type != node_type {
            return Err(BackendError::Unavailable(format!(
                "lookup for {node_type} {node_id} returned artifact of {} {}",
                stored.node_type, stored.node_id
            )));
        }
        Ok(Some(stored.to_ref()))
    }

    async fn create_artifact(&self, draft: &ArtifactDraft) -> Result<ArtifactRef, BackendError> {
        let url = self.endpoint(&["artifacts"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(draft)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response, &draft.node_id).await);
        }

        let stored = response.json::<StoredArtifact>().await?;
        Ok(stored.to_ref())
    }
}
