//! Generators for the text-bearing nodes: paths, lessons and sections.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Ancestry, ContentGenerator, expect_type, require_ancestor, upsert_artifact};
use crate::backend::{ArtifactDraft, ContentBackend};
use crate::error::GenerationError;
use crate::job::{ArtifactRef, GenerationRequest, NodeType};
use crate::outline::OutlineNode;

/// Creates the learning path record under the course.
pub struct PathGenerator {
    backend: Arc<dyn ContentBackend>,
}

impl PathGenerator {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ContentGenerator for PathGenerator {
    fn node_type(&self) -> NodeType {
        NodeType::Path
    }

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError> {
        expect_type(node, NodeType::Path)?;
        let draft = ArtifactDraft {
            node_type: NodeType::Path,
            node_id: node.id.clone(),
            course_id: ancestry.course_id.clone(),
            parent_artifact_id: None,
            title: node.title.clone(),
            body: json!({
                "description": node.description,
                "index": node.index,
                "gradeLevel": request.grade_level,
            }),
        };
        upsert_artifact(self.backend.as_ref(), draft).await
    }
}

/// Creates a lesson record inside its path.
pub struct LessonGenerator {
    backend: Arc<dyn ContentBackend>,
}

impl LessonGenerator {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ContentGenerator for LessonGenerator {
    fn node_type(&self) -> NodeType {
        NodeType::Lesson
    }

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError> {
        expect_type(node, NodeType::Lesson)?;
        let path = require_ancestor(ancestry, node, &[NodeType::Path])?;
        let draft = ArtifactDraft {
            node_type: NodeType::Lesson,
            node_id: node.id.clone(),
            course_id: ancestry.course_id.clone(),
            parent_artifact_id: Some(path.artifact_id.clone()),
            title: node.title.clone(),
            body: json!({
                "description": node.description,
                "index": node.index,
                "gradeLevel": request.grade_level,
            }),
        };
        upsert_artifact(self.backend.as_ref(), draft).await
    }
}

/// Writes the content of one lesson section.
pub struct SectionGenerator {
    backend: Arc<dyn ContentBackend>,
}

impl SectionGenerator {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

fn section_instructions(node: &OutlineNode, request: &GenerationRequest) -> String {
    let mut text = format!("Write the section \"{}\".", node.title);
    if !node.description.trim().is_empty() {
        text.push_str(&format!(" Cover: {}.", node.description.trim()));
    }
    if let Some(grade) = &request.grade_level {
        text.push_str(&format!(" Target grade level: {grade}."));
    }
    text
}

#[async_trait]
impl ContentGenerator for SectionGenerator {
    fn node_type(&self) -> NodeType {
        NodeType::Section
    }

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError> {
        expect_type(node, NodeType::Section)?;
        let lesson = require_ancestor(ancestry, node, &[NodeType::Lesson])?;
        let draft = ArtifactDraft {
            node_type: NodeType::Section,
            node_id: node.id.clone(),
            course_id: ancestry.course_id.clone(),
            parent_artifact_id: Some(lesson.artifact_id.clone()),
            title: node.title.clone(),
            body: json!({
                "index": node.index,
                "instructions": section_instructions(node, request),
            }),
        };
        upsert_artifact(self.backend.as_ref(), draft).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryContentBackend;

    fn setup() -> (Arc<InMemoryContentBackend>, Ancestry) {
        let backend = Arc::new(InMemoryContentBackend::new());
        (backend, Ancestry::root("course-1"))
    }

    #[tokio::test]
    async fn path_lesson_section_chain() {
        let (backend, root) = setup();
        let request = GenerationRequest {
            grade_level: Some("6".into()),
            ..Default::default()
        };

        let path_node = OutlineNode::path("p-1", "Numbers", 1);
        let path = PathGenerator::new(backend.clone())
            .generate(&root, &path_node, &request)
            .await
            .unwrap();

        let lesson_node = OutlineNode::lesson("l-1", "Fractions", 1);
        let lesson_scope = root.child(path.clone());
        let lesson = LessonGenerator::new(backend.clone())
            .generate(&lesson_scope, &lesson_node, &request)
            .await
            .unwrap();

        let section_node =
            OutlineNode::section("s-1", "Halves", 1).with_description("splitting a whole in two");
        let section = SectionGenerator::new(backend.clone())
            .generate(&lesson_scope.child(lesson.clone()), &section_node, &request)
            .await
            .unwrap();

        assert_eq!(section.node_type, NodeType::Section);
        let draft = backend.draft(NodeType::Section, "s-1").unwrap();
        assert_eq!(draft.parent_artifact_id, Some(lesson.artifact_id));
        assert_eq!(
            draft.body["instructions"],
            "Write the section \"Halves\". Cover: splitting a whole in two. Target grade level: 6."
        );
        let lesson_draft = backend.draft(NodeType::Lesson, "l-1").unwrap();
        assert_eq!(lesson_draft.parent_artifact_id, Some(path.artifact_id));
    }

    #[tokio::test]
    async fn lesson_without_path_is_validation_error() {
        let (backend, root) = setup();
        let err = LessonGenerator::new(backend.clone())
            .generate(
                &root,
                &OutlineNode::lesson("l-1", "Orphan", 1),
                &GenerationRequest::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn wrong_node_type_is_validation_error() {
        let (backend, root) = setup();
        let err = PathGenerator::new(backend)
            .generate(
                &root,
                &OutlineNode::section("s", "S", 1),
                &GenerationRequest::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[tokio::test]
    async fn repeated_generation_yields_one_artifact() {
        let (backend, root) = setup();
        let generator = PathGenerator::new(backend.clone());
        let node = OutlineNode::path("p-1", "Numbers", 1);
        let request = GenerationRequest::default();

        let first = generator.generate(&root, &node, &request).await.unwrap();
        let second = generator.generate(&root, &node, &request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.create_calls(), 1);
    }
}
