//! Projects, their truth document, and immutable truth snapshots.

use super::ids::{ProjectId, SnapshotId, TruthId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A script project. Owns exactly one current truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// `None` until someone claims the project.
    pub owner: Option<UserId>,
    pub is_public: bool,
    /// Version of the newest snapshot; 0 while the project has none.
    pub latest_version: u32,
    /// Id of the newest snapshot, advanced together with `latest_version`.
    #[serde(default)]
    pub latest_snapshot: Option<SnapshotId>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, owner: Option<UserId>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            owner,
            is_public: false,
            latest_version: 0,
            latest_snapshot: None,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a truth document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthStatus {
    /// Editable.
    Draft,
    /// Frozen into a snapshot; edits are rejected until unlocked.
    Locked,
}

impl TruthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruthStatus::Draft => "draft",
            TruthStatus::Locked => "locked",
        }
    }
}

/// The mutable canonical narrative document of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truth {
    pub id: TruthId,
    pub project_id: ProjectId,
    pub status: TruthStatus,
    /// Opaque structured document payload.
    pub content: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Truth {
    /// Create an empty draft for a project.
    pub fn draft(project_id: ProjectId, content: Value) -> Self {
        let now = Utc::now();
        Self {
            id: TruthId::new(),
            project_id,
            status: TruthStatus::Draft,
            content,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status == TruthStatus::Locked
    }
}

/// An immutable, versioned copy of a truth taken at lock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruthSnapshot {
    pub id: SnapshotId,
    pub project_id: ProjectId,
    pub truth_id: TruthId,
    /// 1-based, gap-free per project.
    pub version: u32,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl TruthSnapshot {
    /// Freeze the truth's current content under the given version.
    pub fn of(truth: &Truth, version: u32) -> Self {
        Self {
            id: SnapshotId::new(),
            project_id: truth.project_id,
            truth_id: truth.id,
            version,
            content: truth.content.clone(),
            created_at: Utc::now(),
        }
    }
}
