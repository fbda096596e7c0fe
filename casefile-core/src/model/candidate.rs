//! Candidates produced by derivation, and the records that track them.

use super::action::{ActionType, CommitMode};
use super::ids::{CandidateId, GenerationId, ProjectId, SnapshotId};
use super::module::ModuleKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized, not-yet-committed unit of derived content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Module the candidate is meant for, if any.
    #[serde(default)]
    pub target: Option<ModuleKind>,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Rich document payload.
    pub content: Value,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    /// The raw item as the model produced it.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Review state of a staged candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A candidate persisted for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub project_id: ProjectId,
    pub snapshot_id: SnapshotId,
    pub action: ActionType,
    pub candidate: Candidate,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    pub fn pending(
        project_id: ProjectId,
        snapshot_id: SnapshotId,
        action: ActionType,
        candidate: Candidate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CandidateId::new(),
            project_id,
            snapshot_id,
            action,
            candidate,
            status: CandidateStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What the caller sees of a persisted candidate once a derivation completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    /// Id of the record the candidate was persisted as (entry, candidate or issue).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

/// Audit record of one successful model request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationLog {
    pub id: GenerationId,
    pub project_id: ProjectId,
    pub snapshot_id: SnapshotId,
    pub action: ActionType,
    pub provider: String,
    pub model: String,
    pub prompt_id: String,
    pub commit_mode: CommitMode,
    pub candidate_count: usize,
    pub created_at: DateTime<Utc>,
}
