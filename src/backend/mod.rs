pub mod error;
pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::job::{ArtifactRef, NodeType};

pub use error::BackendError;
pub use http::HttpContentBackend;
pub use memory::InMemoryContentBackend;
pub use types::{ArtifactDraft, StoredArtifact};

/// Downstream content and media creation capability used by generators.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Look up an artifact by its natural key.
    async fn find_artifact(
        &self,
        node_type: NodeType,
        node_id: &str,
    ) -> Result<Option<ArtifactRef>, BackendError>;

    /// Create an artifact. Fails with [`BackendError::Conflict`] if one
    /// already exists for the draft's natural key.
    async fn create_artifact(&self, draft: &ArtifactDraft) -> Result<ArtifactRef, BackendError>;
}
