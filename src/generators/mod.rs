//! Content generators: one per outline node type.
//!
//! Every generator receives the artifact references of its ancestors, its own
//! outline node and the job's request, and produces exactly one artifact.
//! Generators are idempotent per node id: an artifact that already exists is
//! returned instead of created again.

mod assessment;
mod content;
mod media;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{ArtifactDraft, BackendError, ContentBackend};
use crate::error::GenerationError;
use crate::job::{ArtifactRef, GenerationRequest, NodeType};
use crate::outline::OutlineNode;

pub use assessment::AssessmentGenerator;
pub use content::{LessonGenerator, PathGenerator, SectionGenerator};
pub use media::MediaGenerator;

/// Persisted references of a node's ancestors, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestry {
    pub course_id: String,
    refs: Vec<ArtifactRef>,
}

impl Ancestry {
    pub fn root(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            refs: Vec::new(),
        }
    }

    /// Ancestry for a child of the node that produced `artifact`.
    pub fn child(&self, artifact: ArtifactRef) -> Self {
        let mut refs = self.refs.clone();
        refs.push(artifact);
        Self {
            course_id: self.course_id.clone(),
            refs,
        }
    }

    pub fn parent(&self) -> Option<&ArtifactRef> {
        self.refs.last()
    }

    /// Closest ancestor of the given type.
    pub fn nearest(&self, node_type: NodeType) -> Option<&ArtifactRef> {
        self.refs.iter().rev().find(|r| r.node_type == node_type)
    }

    pub fn refs(&self) -> &[ArtifactRef] {
        &self.refs
    }
}

/// Produces the artifact for one outline node type.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn generate(
        &self,
        ancestry: &Ancestry,
        node: &OutlineNode,
        request: &GenerationRequest,
    ) -> Result<ArtifactRef, GenerationError>;
}

/// One generator per [`NodeType`].
#[derive(Clone)]
pub struct GeneratorSet {
    path: Arc<dyn ContentGenerator>,
    lesson: Arc<dyn ContentGenerator>,
    section: Arc<dyn ContentGenerator>,
    assessment: Arc<dyn ContentGenerator>,
    media: Arc<dyn ContentGenerator>,
}

impl GeneratorSet {
    /// The default generators, all writing through `backend`.
    pub fn from_backend(backend: Arc<dyn ContentBackend>) -> Self {
        Self {
            path: Arc::new(PathGenerator::new(backend.clone())),
            lesson: Arc::new(LessonGenerator::new(backend.clone())),
            section: Arc::new(SectionGenerator::new(backend.clone())),
            assessment: Arc::new(AssessmentGenerator::new(backend.clone())),
            media: Arc::new(MediaGenerator::new(backend)),
        }
    }

    /// Replace the generator registered for `generator.node_type()`.
    pub fn with(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        match generator.node_type() {
            NodeType::Path => self.path = generator,
            NodeType::Lesson => self.lesson = generator,
            NodeType::Section => self.section = generator,
            NodeType::Assessment => self.assessment = generator,
            NodeType::Media => self.media = generator,
        }
        self
    }

    pub fn for_type(&self, node_type: NodeType) -> &Arc<dyn ContentGenerator> {
        match node_type {
            NodeType::Path => &self.path,
            NodeType::Lesson => &self.lesson,
            NodeType::Section => &self.section,
            NodeType::Assessment => &self.assessment,
            NodeType::Media => &self.media,
        }
    }
}

/// Check-and-create against the backend using the draft's natural key.
///
/// An existing artifact short-circuits to success. A creation conflict
/// (another writer won the race) resolves to
/// [`GenerationError::Conflict`] carrying the existing reference.
pub(crate) async fn upsert_artifact(
    backend: &dyn ContentBackend,
    draft: ArtifactDraft,
) -> Result<ArtifactRef, GenerationError> {
    if let Some(existing) = backend.find_artifact(draft.node_type, &draft.node_id).await? {
        debug!(
            node_id = %draft.node_id,
            artifact_id = %existing.artifact_id,
            "artifact already exists, skipping creation"
        );
        return Ok(existing);
    }

    match backend.create_artifact(&draft).await {
        Ok(created) => Ok(created),
        Err(BackendError::Conflict { node_id }) => {
            match backend.find_artifact(draft.node_type, &node_id).await? {
                Some(existing) => Err(GenerationError::Conflict { existing }),
                None => Err(GenerationError::Transient(format!(
                    "conflict reported for {node_id} but no artifact found"
                ))),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Reject a node whose kind does not match the generator it was routed to.
pub(crate) fn expect_type(node: &OutlineNode, expected: NodeType) -> Result<(), GenerationError> {
    if node.node_type() != expected {
        return Err(type_mismatch(node, expected));
    }
    Ok(())
}

pub(crate) fn type_mismatch(node: &OutlineNode, expected: NodeType) -> GenerationError {
    GenerationError::Validation(format!(
        "{} generator received {} node {}",
        expected,
        node.node_type(),
        node.id
    ))
}

/// The nearest ancestor of the first of `types` present, or a validation
/// error. `types` is in order of preference.
pub(crate) fn require_ancestor<'a>(
    ancestry: &'a Ancestry,
    node: &OutlineNode,
    types: &[NodeType],
) -> Result<&'a ArtifactRef, GenerationError> {
    types
        .iter()
        .find_map(|t| ancestry.nearest(*t))
        .ok_or_else(|| {
            GenerationError::Validation(format!(
                "{} {} has no persisted {} ancestor",
                node.node_type(),
                node.id,
                types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join("/")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryContentBackend;
    use crate::outline::MediaType;

    struct NoopGenerator(NodeType);

    #[async_trait]
    impl ContentGenerator for NoopGenerator {
        fn node_type(&self) -> NodeType {
            self.0
        }

        async fn generate(
            &self,
            _ancestry: &Ancestry,
            node: &OutlineNode,
            _request: &GenerationRequest,
        ) -> Result<ArtifactRef, GenerationError> {
            Ok(ArtifactRef::new(node.id.clone(), self.0, "noop"))
        }
    }

    #[test]
    fn ancestry_tracks_nearest_of_type() {
        let root = Ancestry::root("course-1");
        assert!(root.parent().is_none());

        let path = root.child(ArtifactRef::new("p", NodeType::Path, "pa"));
        let lesson = path.child(ArtifactRef::new("l", NodeType::Lesson, "la"));
        assert_eq!(lesson.parent().unwrap().artifact_id, "la");
        assert_eq!(lesson.nearest(NodeType::Path).unwrap().artifact_id, "pa");
        assert!(lesson.nearest(NodeType::Section).is_none());
        assert_eq!(root.refs().len(), 0);
    }

    #[test]
    fn required_ancestor_follows_preference() {
        let path = Ancestry::root("c").child(ArtifactRef::new("p", NodeType::Path, "pa"));
        let lesson = path.child(ArtifactRef::new("l", NodeType::Lesson, "la"));
        let quiz = OutlineNode::assessment("q", "Quiz", 1);
        let types = [NodeType::Lesson, NodeType::Path];

        assert_eq!(require_ancestor(&lesson, &quiz, &types).unwrap().artifact_id, "la");
        assert_eq!(require_ancestor(&path, &quiz, &types).unwrap().artifact_id, "pa");
        let err = require_ancestor(&Ancestry::root("c"), &quiz, &types).unwrap_err();
        assert!(err.to_string().contains("lesson/path"));
    }

    #[test]
    fn generator_set_routes_by_type() {
        let backend = Arc::new(InMemoryContentBackend::new());
        let set = GeneratorSet::from_backend(backend);
        for t in [
            NodeType::Path,
            NodeType::Lesson,
            NodeType::Section,
            NodeType::Assessment,
            NodeType::Media,
        ] {
            assert_eq!(set.for_type(t).node_type(), t);
        }
    }

    #[tokio::test]
    async fn with_replaces_single_generator() {
        let backend = Arc::new(InMemoryContentBackend::new());
        let set = GeneratorSet::from_backend(backend.clone())
            .with(Arc::new(NoopGenerator(NodeType::Media)));
        let node = OutlineNode::media("m", "Digest", 1, MediaType::AudioDigest);
        let artifact = set
            .for_type(NodeType::Media)
            .generate(&Ancestry::root("c"), &node, &GenerationRequest::default())
            .await
            .unwrap();
        assert_eq!(artifact.artifact_id, "noop");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn upsert_returns_existing_without_creating() {
        let backend = InMemoryContentBackend::new();
        let draft = ArtifactDraft {
            node_type: NodeType::Lesson,
            node_id: "l-1".into(),
            course_id: "c".into(),
            parent_artifact_id: None,
            title: "L".into(),
            body: serde_json::Value::Null,
        };
        let first = upsert_artifact(&backend, draft.clone()).await.unwrap();
        let second = upsert_artifact(&backend, draft).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.create_calls(), 1);
    }

    /// Backend that hides existing artifacts from the first lookup, so the
    /// create call races into a conflict.
    struct RacingBackend {
        inner: InMemoryContentBackend,
        lookups: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ContentBackend for RacingBackend {
        async fn find_artifact(
            &self,
            node_type: NodeType,
            node_id: &str,
        ) -> Result<Option<ArtifactRef>, BackendError> {
            let n = self
                .lookups
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                return Ok(None);
            }
            self.inner.find_artifact(node_type, node_id).await
        }

        async fn create_artifact(&self, draft: &ArtifactDraft) -> Result<ArtifactRef, BackendError> {
            self.inner.create_artifact(draft).await
        }
    }

    #[tokio::test]
    async fn creation_conflict_resolves_to_existing_reference() {
        let backend = RacingBackend {
            inner: InMemoryContentBackend::new(),
            lookups: Default::default(),
        };
        let draft = ArtifactDraft {
            node_type: NodeType::Section,
            node_id: "s-1".into(),
            course_id: "c".into(),
            parent_artifact_id: None,
            title: "S".into(),
            body: serde_json::Value::Null,
        };
        let existing = backend.inner.create_artifact(&draft).await.unwrap();

        let err = upsert_artifact(&backend, draft).await.unwrap_err();
        match err {
            GenerationError::Conflict { existing: found } => assert_eq!(found, existing),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(backend.inner.len(), 1);
    }
}
