//! Media generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{Ancestry, ContentGenerator, require_ancestor, type_mismatch, upsert_artifact};
use crate::backend::{ArtifactDraft, ContentBackend};
use crate::error::GenerationError;
use crate::job::{ArtifactRef, GenerationRequest, NodeType};
use crate::outline::{NodeKind, OutlineNode};

/// Produces a media asset (audio digest, video, infographic) from the
/// content of its enclosing lesson or path.
pub struct MediaGenerator {
    backend: Arc<dyn ContentBackend>,
}

impl MediaGenerator {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ContentGenerator for MediaGenerator {
    fn node_type(&self) -> NodeType {
        NodeType::Media
    }

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError> {
        let NodeKind::Media { media_type } = node.kind else {
            return Err(type_mismatch(node, NodeType::Media));
        };
        if !request.wants_media(media_type) {
            return Err(GenerationError::Validation(format!(
                "media {} is {media_type}, which the request does not ask for",
                node.id
            )));
        }

        let source = require_ancestor(ancestry, node, &[NodeType::Lesson, NodeType::Path])?;
        debug!(node_id = %node.id, %media_type, source = %source.artifact_id, "requesting media");

        let draft = ArtifactDraft {
            node_type: NodeType::Media,
            node_id: node.id.clone(),
            course_id: ancestry.course_id.clone(),
            parent_artifact_id: Some(source.artifact_id.clone()),
            title: node.title.clone(),
            body: json!({
                "mediaType": media_type,
                "sourceArtifactId": source.artifact_id,
                "sourceType": source.node_type,
                "gradeLevel": request.grade_level,
            }),
        };
        upsert_artifact(self.backend.as_ref(), draft).await
    }
}
