//! The persisted job: status, per-node stage results and the audit view.
//!
//! A [`StageResult`] keeps every attempt it made, so a reader can see why
//! a node was retried. The job's terminal status is derived from the stage
//! results of the required nodes once every stage has settled.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::GenerationRequest;
use crate::error::ErrorKind;
use crate::outline::{Outline, OutlineNode};

/// Payload-free discriminant of an outline node, recorded on stage results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Path,
    Lesson,
    Section,
    Assessment,
    Media,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Path => "path",
            NodeType::Lesson => "lesson",
            NodeType::Section => "section",
            NodeType::Assessment => "assessment",
            NodeType::Media => "media",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a persisted artifact, keyed by the outline node that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub node_id: String,
    pub node_type: NodeType,
    pub artifact_id: String,
}

impl ArtifactRef {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, artifact_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            artifact_id: artifact_id.into(),
        }
    }
}

/// Kind and message of a persisted failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Status of a single stage (one outline node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Running)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Running => write!(f, "running"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One generator attempt, appended to [`StageResult::history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub at: DateTime<Utc>,
}

/// Latest authoritative record for one outline node.
///
/// Created on the first attempt, mutated on every retry and frozen once its
/// status is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub node_id: String,
    pub node_type: NodeType,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ArtifactRef>,
    #[serde(default)]
    pub history: Vec<AttemptRecord>,
    pub updated_at: DateTime<Utc>,
}

impl StageResult {
    /// A fresh `running` record with no attempts yet.
    pub fn running(node_id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            status: StageStatus::Running,
            attempts: 0,
            last_error: None,
            artifact_ref: None,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// A terminal `skipped` record for a node whose ancestor failed.
    pub fn skipped(node_id: impl Into<String>, node_type: NodeType, cause: JobError) -> Self {
        let mut result = Self::running(node_id, node_type);
        result.status = StageStatus::Skipped;
        result.last_error = Some(cause);
        result
    }

    /// Record a failed attempt that will be retried.
    pub fn record_retry(&mut self, error: JobError) {
        self.push_attempt(StageStatus::Running, Some(error));
    }

    /// Record the successful attempt and freeze the record.
    pub fn succeed(&mut self, artifact: ArtifactRef) {
        self.push_attempt(StageStatus::Succeeded, None);
        self.artifact_ref = Some(artifact);
    }

    /// Record the final failed attempt and freeze the record.
    pub fn fail(&mut self, error: JobError) {
        self.push_attempt(StageStatus::Failed, Some(error));
    }

    fn push_attempt(&mut self, status: StageStatus, error: Option<JobError>) {
        let now = Utc::now();
        self.attempts += 1;
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            status,
            error: error.clone(),
            at: now,
        });
        self.status = status;
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = now;
    }
}

/// Job-level lifecycle status.
///
/// `pending -> running -> {completed | partially_failed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    PartiallyFailed,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::PartiallyFailed | JobStatus::Failed | JobStatus::Completed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::PartiallyFailed => write!(f, "partially_failed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A course generation job as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: String,
    pub outline: Outline,
    pub request: GenerationRequest,
    pub status: JobStatus,
    #[serde(default)]
    pub stage_results: BTreeMap<String, StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn new(id: impl Into<String>, outline: Outline, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            outline,
            request,
            status: JobStatus::Pending,
            stage_results: BTreeMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stage(&self, node_id: &str) -> Option<&StageResult> {
        self.stage_results.get(node_id)
    }

    /// Terminal status after every stage has run: `completed` iff every
    /// required node succeeded, `partially_failed` otherwise.
    pub fn derive_outcome(&self, required: &[&OutlineNode]) -> JobStatus {
        let all_succeeded = required.iter().all(|node| {
            self.stage(&node.id)
                .is_some_and(|r| r.status == StageStatus::Succeeded)
        });
        if all_succeeded {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyFailed
        }
    }

    /// Artifacts that were produced, in node id order.
    pub fn succeeded_artifacts(&self) -> Vec<&ArtifactRef> {
        self.stage_results
            .values()
            .filter(|r| r.status == StageStatus::Succeeded)
            .filter_map(|r| r.artifact_ref.as_ref())
            .collect()
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stage_results
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// True once any stage result has been persisted for this job.
    pub fn has_started_stages(&self) -> bool {
        !self.stage_results.is_empty()
    }
}

/// Structured audit record produced for a terminal job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub job_id: String,
    pub course_title: String,
    pub status: JobStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    /// Generate an audit record from a job, using now for unfinished jobs.
    pub fn from_job(job: &GenerationJob) -> Self {
        let started_at = job.started_at.unwrap_or(job.created_at);
        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        let failures = job
            .stage_results
            .values()
            .filter(|r| r.status == StageStatus::Failed)
            .map(|r| match &r.last_error {
                Some(err) => format!("{} {}: {err}", r.node_type, r.node_id),
                None => format!("{} {}", r.node_type, r.node_id),
            })
            .collect();

        Self {
            job_id: job.id.clone(),
            course_title: job.outline.title.clone(),
            status: job.status,
            succeeded: job.count(StageStatus::Succeeded),
            failed: job.count(StageStatus::Failed),
            skipped: job.count(StageStatus::Skipped),
            total_attempts: job.stage_results.values().map(|r| r.attempts).sum(),
            failures,
            error: job.error.clone(),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::tests::sample_outline;

    fn job() -> GenerationJob {
        GenerationJob::new("job-1", sample_outline(), GenerationRequest::default())
    }

    #[test]
    fn job_creation_defaults() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.stage_results.is_empty());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.has_started_stages());
    }

    #[test]
    fn stage_result_records_attempt_history() {
        let mut result = StageResult::running("sec-1", NodeType::Section);
        assert_eq!(result.attempts, 0);

        result.record_retry(JobError::new(ErrorKind::TransientError, "503"));
        assert_eq!(result.status, StageStatus::Running);
        assert_eq!(result.attempts, 1);

        result.succeed(ArtifactRef::new("sec-1", NodeType::Section, "a-1"));
        assert_eq!(result.status, StageStatus::Succeeded);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.history.len(), 2);
        assert_eq!(result.history[0].status, StageStatus::Running);
        assert_eq!(result.history[1].status, StageStatus::Succeeded);
        // The last error stays visible after a successful retry.
        assert_eq!(result.last_error.unwrap().message, "503");
    }

    #[test]
    fn skipped_result_is_terminal_without_attempts() {
        let cause = JobError::new(ErrorKind::TransientError, "ancestor lesson-1 failed");
        let result = StageResult::skipped("sec-2", NodeType::Section, cause);
        assert!(result.status.is_terminal());
        assert_eq!(result.attempts, 0);
    }

    #[test]
    fn derive_outcome_requires_every_node_succeeded() {
        let mut job = job();
        let outline = job.outline.clone();
        let request = job.request.clone();
        let required = outline.required_nodes(&request);

        for node in &required {
            let mut r = StageResult::running(node.id.clone(), node.node_type());
            r.succeed(ArtifactRef::new(node.id.clone(), node.node_type(), "x"));
            job.stage_results.insert(node.id.clone(), r);
        }
        assert_eq!(job.derive_outcome(&required), JobStatus::Completed);

        let last = required.last().unwrap();
        let mut failed = StageResult::running(last.id.clone(), last.node_type());
        failed.fail(JobError::new(ErrorKind::TransientError, "down"));
        job.stage_results.insert(last.id.clone(), failed);
        assert_eq!(job.derive_outcome(&required), JobStatus::PartiallyFailed);
        assert_eq!(job.succeeded_artifacts().len(), required.len() - 1);
    }

    #[test]
    fn missing_stage_is_not_completed() {
        let job = job();
        let required = job.outline.required_nodes(&job.request);
        assert_eq!(job.derive_outcome(&required), JobStatus::PartiallyFailed);
    }

    #[test]
    fn audit_record_from_job() {
        let mut job = job();
        let mut ok = StageResult::running("path-1", NodeType::Path);
        ok.succeed(ArtifactRef::new("path-1", NodeType::Path, "p"));
        let mut bad = StageResult::running("lesson-1", NodeType::Lesson);
        bad.record_retry(JobError::new(ErrorKind::TransientError, "timeout"));
        bad.fail(JobError::new(ErrorKind::TransientError, "timeout"));
        job.stage_results.insert(ok.node_id.clone(), ok);
        job.stage_results.insert(bad.node_id.clone(), bad);
        job.status = JobStatus::PartiallyFailed;

        let record = AuditRecord::from_job(&job);
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.succeeded, 1);
        assert_eq!(record.failed, 1);
        assert_eq!(record.total_attempts, 3);
        assert_eq!(
            record.failures,
            vec!["lesson lesson-1: transient_error: timeout".to_string()]
        );
    }

    #[test]
    fn job_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::PartiallyFailed).unwrap();
        assert_eq!(json, r#""partially_failed""#);
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn job_json_uses_camel_case_fields() {
        let job = job();
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("stageResults").is_some());
        assert!(json.get("createdAt").is_some());
        let back: GenerationJob = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, "job-1");
    }
}
