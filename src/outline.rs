//! Typed course outline submitted with a generation job.
//!
//! An [`Outline`] is a tree: course -> paths -> lessons -> sections,
//! assessments and media. Every node carries a stable id used as the
//! idempotency key for its stage result and artifact.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{GenerationRequest, NodeType};

/// Media assets a generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    AudioDigest,
    Video,
    Infographic,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::AudioDigest => write!(f, "audio_digest"),
            MediaType::Video => write!(f, "video"),
            MediaType::Infographic => write!(f, "infographic"),
        }
    }
}

/// Node variant with its type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Path,
    Lesson,
    Section,
    Assessment {
        #[serde(default = "default_question_count", rename = "questionCount")]
        question_count: u32,
    },
    Media {
        #[serde(rename = "mediaType")]
        media_type: MediaType,
    },
}

fn default_question_count() -> u32 {
    5
}

/// Structural problems found before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutlineError {
    #[error("outline has no course id")]
    MissingCourseId,

    #[error("outline has no paths")]
    Empty,

    #[error("node with empty id")]
    EmptyId,

    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error("node {0} has an empty title")]
    EmptyTitle(String),

    #[error("{kind} node {node_id} cannot be placed under {parent}")]
    Misplaced {
        node_id: String,
        kind: NodeType,
        parent: String,
    },
}

/// One element of the outline tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub index: u32,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, index: u32, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            index,
            kind,
            children: Vec::new(),
        }
    }

    pub fn path(id: impl Into<String>, title: impl Into<String>, index: u32) -> Self {
        Self::new(id, title, index, NodeKind::Path)
    }

    pub fn lesson(id: impl Into<String>, title: impl Into<String>, index: u32) -> Self {
        Self::new(id, title, index, NodeKind::Lesson)
    }

    pub fn section(id: impl Into<String>, title: impl Into<String>, index: u32) -> Self {
        Self::new(id, title, index, NodeKind::Section)
    }

    pub fn assessment(id: impl Into<String>, title: impl Into<String>, index: u32) -> Self {
        Self::new(
            id,
            title,
            index,
            NodeKind::Assessment {
                question_count: default_question_count(),
            },
        )
    }

    pub fn media(
        id: impl Into<String>,
        title: impl Into<String>,
        index: u32,
        media_type: MediaType,
    ) -> Self {
        Self::new(id, title, index, NodeKind::Media { media_type })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_child(mut self, child: OutlineNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Path => NodeType::Path,
            NodeKind::Lesson => NodeType::Lesson,
            NodeKind::Section => NodeType::Section,
            NodeKind::Assessment { .. } => NodeType::Assessment,
            NodeKind::Media { .. } => NodeType::Media,
        }
    }

    /// Children in ascending `index` order; ties keep declaration order.
    pub fn ordered_children(&self) -> Vec<&OutlineNode> {
        ordered(&self.children)
    }

    /// Whether `request` asks for this node to be generated.
    pub fn is_required(&self, request: &GenerationRequest) -> bool {
        match self.kind {
            NodeKind::Path | NodeKind::Lesson | NodeKind::Section => true,
            NodeKind::Assessment { .. } => request.include_assessments,
            NodeKind::Media { media_type } => request.wants_media(media_type),
        }
    }

    /// Required descendants of this node in walk order, excluding the node itself.
    pub fn required_descendants(&self, request: &GenerationRequest) -> Vec<&OutlineNode> {
        let mut out = Vec::new();
        for child in self.ordered_children() {
            collect_required(child, request, &mut out);
        }
        out
    }

    fn accepts_child(&self, child: &NodeKind) -> bool {
        match self.kind {
            NodeKind::Path => matches!(
                child,
                NodeKind::Lesson | NodeKind::Assessment { .. } | NodeKind::Media { .. }
            ),
            NodeKind::Lesson => matches!(
                child,
                NodeKind::Section | NodeKind::Assessment { .. } | NodeKind::Media { .. }
            ),
            NodeKind::Section | NodeKind::Assessment { .. } | NodeKind::Media { .. } => false,
        }
    }
}

/// The course tree submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub course_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub paths: Vec<OutlineNode>,
}

impl Outline {
    pub fn new(course_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            title: title.into(),
            description: String::new(),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: OutlineNode) -> Self {
        self.paths.push(path);
        self
    }

    pub fn ordered_paths(&self) -> Vec<&OutlineNode> {
        ordered(&self.paths)
    }

    /// Every node the request requires, in depth-first outline order.
    pub fn required_nodes(&self, request: &GenerationRequest) -> Vec<&OutlineNode> {
        let mut out = Vec::new();
        for path in self.ordered_paths() {
            collect_required(path, request, &mut out);
        }
        out
    }

    /// Check the structural rules of the tree.
    pub fn validate(&self) -> Result<(), OutlineError> {
        if self.course_id.trim().is_empty() {
            return Err(OutlineError::MissingCourseId);
        }
        if self.paths.is_empty() {
            return Err(OutlineError::Empty);
        }

        let mut seen = HashSet::new();
        for path in &self.paths {
            if !matches!(path.kind, NodeKind::Path) {
                return Err(OutlineError::Misplaced {
                    node_id: path.id.clone(),
                    kind: path.node_type(),
                    parent: "course".into(),
                });
            }
            validate_node(path, &mut seen)?;
        }
        Ok(())
    }
}

fn ordered(nodes: &[OutlineNode]) -> Vec<&OutlineNode> {
    let mut sorted: Vec<&OutlineNode> = nodes.iter().collect();
    sorted.sort_by_key(|n| n.index);
    sorted
}

fn collect_required<'a>(
    node: &'a OutlineNode,
    request: &GenerationRequest,
    out: &mut Vec<&'a OutlineNode>,
) {
    if !node.is_required(request) {
        return;
    }
    out.push(node);
    for child in node.ordered_children() {
        collect_required(child, request, out);
    }
}

fn validate_node<'a>(node: &'a OutlineNode, seen: &mut HashSet<&'a str>) -> Result<(), OutlineError> {
    if node.id.trim().is_empty() {
        return Err(OutlineError::EmptyId);
    }
    if !seen.insert(node.id.as_str()) {
        return Err(OutlineError::DuplicateId(node.id.clone()));
    }
    if node.title.trim().is_empty() {
        return Err(OutlineError::EmptyTitle(node.id.clone()));
    }
    for child in &node.children {
        if !node.accepts_child(&child.kind) {
            return Err(OutlineError::Misplaced {
                node_id: child.id.clone(),
                kind: child.node_type(),
                parent: format!("{} {}", node.node_type(), node.id),
            });
        }
        validate_node(child, seen)?;
    }
    Ok(())
}
