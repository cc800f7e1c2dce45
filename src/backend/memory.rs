use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use super::error::BackendError;
use super::types::ArtifactDraft;
use super::ContentBackend;
use crate::job::{ArtifactRef, NodeType};

/// Process-local content backend. Backs the `demo` command and tests.
#[derive(Default)]
pub struct InMemoryContentBackend {
    artifacts: Mutex<HashMap<(NodeType, String), (ArtifactRef, ArtifactDraft)>>,
    create_calls: AtomicUsize,
}

impl InMemoryContentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `create_artifact` calls, including rejected duplicates.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct artifacts stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The draft stored for a node, if any.
    pub fn draft(&self, node_type: NodeType, node_id: &str) -> Option<ArtifactDraft> {
        self.lock()
            .get(&(node_type, node_id.to_string()))
            .map(|(_, draft)| draft.clone())
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(NodeType, String), (ArtifactRef, ArtifactDraft)>> {
        // A poisoned map is still consistent: every insert is a single call.
        self.artifacts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ContentBackend for InMemoryContentBackend {
    async fn find_artifact(
        &self,
        node_type: NodeType,
        node_id: &str,
    ) -> Result<Option<ArtifactRef>, BackendError> {
        Ok(self
            .lock()
            .get(&(node_type, node_id.to_string()))
            .map(|(r, _)| r.clone()))
    }

    async fn create_artifact(&self, draft: &ArtifactDraft) -> Result<ArtifactRef, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let key = (draft.node_type, draft.node_id.clone());
        let mut artifacts = self.lock();
        if artifacts.contains_key(&key) {
            return Err(BackendError::Conflict {
                node_id: draft.node_id.clone(),
            });
        }
        let artifact = ArtifactRef::new(
            draft.node_id.clone(),
            draft.node_type,
            Uuid::new_v4().to_string(),
        );
        artifacts.insert(key, (artifact.clone(), draft.clone()));
        Ok(artifact)
    }
}
