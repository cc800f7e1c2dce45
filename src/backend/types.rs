//! Wire types exchanged with the content backend.

use serde::{Deserialize, Serialize};

use crate::job::{ArtifactRef, NodeType};

/// Payload for creating one artifact.
///
/// `node_id` is the natural key: the backend never stores two artifacts with
/// the same `(node_type, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDraft {
    pub node_type: NodeType,
    pub node_id: String,
    pub course_id: String,
    /// Artifact id of the nearest persisted ancestor, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_artifact_id: Option<String>,
    pub title: String,
    /// Type-specific content instructions.
    pub body: serde_json::Value,
}

/// Artifact record as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub id: String,
    pub node_type: NodeType,
    pub node_id: String,
}

impl StoredArtifact {
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef::new(self.node_id.clone(), self.node_type, self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_serializes_camel_case() {
        let draft = ArtifactDraft {
            node_type: NodeType::Section,
            node_id: "s-1".into(),
            course_id: "c-1".into(),
            parent_artifact_id: Some("lesson-art".into()),
            title: "Intro".into(),
            body: serde_json::json!({"gradeLevel": "5"}),
        };
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["nodeType"], "section");
        assert_eq!(json["parentArtifactId"], "lesson-art");
        assert!(json.get("node_id").is_none());
    }

    #[test]
    fn stored_artifact_from_api_format() {
        let api_json = r#"{"id": "art-1", "nodeType": "lesson", "nodeId": "l-1"}"#;
        let stored: StoredArtifact = serde_json::from_str(api_json).unwrap();
        assert_eq!(
            stored.to_ref(),
            ArtifactRef::new("l-1", NodeType::Lesson, "art-1")
        );
    }
}
