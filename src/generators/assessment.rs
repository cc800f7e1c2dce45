//! Assessment generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Ancestry, ContentGenerator, require_ancestor, type_mismatch, upsert_artifact};
use crate::backend::{ArtifactDraft, ContentBackend};
use crate::error::GenerationError;
use crate::job::{ArtifactRef, GenerationRequest, NodeType};
use crate::outline::{NodeKind, OutlineNode};

/// Upper bound on questions per assessment.
const MAX_QUESTIONS: u32 = 50;

/// Builds a quiz over its enclosing lesson, or over the whole path when it
/// hangs directly off one.
pub struct AssessmentGenerator {
    backend: Arc<dyn ContentBackend>,
}

impl AssessmentGenerator {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ContentGenerator for AssessmentGenerator {
    fn node_type(&self) -> NodeType {
        NodeType::Assessment
    }

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError> {
        let NodeKind::Assessment { question_count } = node.kind else {
            return Err(type_mismatch(node, NodeType::Assessment));
        };
        if question_count == 0 || question_count > MAX_QUESTIONS {
            return Err(GenerationError::Validation(format!(
                "assessment {} asks for {question_count} questions (allowed 1..={MAX_QUESTIONS})",
                node.id
            )));
        }

        let scope = require_ancestor(ancestry, node, &[NodeType::Lesson, NodeType::Path])?;
        let draft = ArtifactDraft {
            node_type: NodeType::Assessment,
            node_id: node.id.clone(),
            course_id: ancestry.course_id.clone(),
            parent_artifact_id: Some(scope.artifact_id.clone()),
            title: node.title.clone(),
            body: json!({
                "scope": scope.node_type,
                "questionCount": question_count,
                "gradeLevel": request.grade_level,
                "description": node.description,
            }),
        };
        upsert_artifact(self.backend.as_ref(), draft).await
    }
}
