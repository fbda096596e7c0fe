//! Consistency issues recorded in the issue ledger.

use super::ids::{EntryId, IssueId, ProjectId, SnapshotId};
use super::module::ModuleKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Blocks publication.
    P0,
    /// Warning.
    P1,
    /// Informational.
    P2,
}

impl Severity {
    pub fn is_blocking(&self) -> bool {
        *self == Severity::P0
    }
}

/// The subsystem that produced an issue. The ledger is replaced per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueSource {
    /// The publish gate.
    Publish,
    /// A consistency check run through derivation.
    DerivationCheck,
}

impl IssueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSource::Publish => "publish",
            IssueSource::DerivationCheck => "derivation-check",
        }
    }
}

impl fmt::Display for IssueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable issue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    RoleMotiveEmpty,
    ClueUnbound,
    ClueRefDangling,
    TimelineConflict,
    WorldcheckRisk,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::RoleMotiveEmpty => "ROLE_MOTIVE_EMPTY",
            IssueCode::ClueUnbound => "CLUE_UNBOUND",
            IssueCode::ClueRefDangling => "CLUE_REF_DANGLING",
            IssueCode::TimelineConflict => "TIMELINE_CONFLICT",
            IssueCode::WorldcheckRisk => "WORLDCHECK_RISK",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to an entity implicated by an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    #[serde(default)]
    pub module: Option<ModuleKind>,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn entry(module: ModuleKind, id: EntryId, name: impl Into<String>) -> Self {
        Self {
            module: Some(module),
            id: id.to_string(),
            name: Some(name.into()),
        }
    }

    /// A reference the model produced; shape unknown.
    pub fn opaque(id: impl Into<String>) -> Self {
        Self {
            module: None,
            id: id.into(),
            name: None,
        }
    }
}

/// A finding, before it is bound to a ledger scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub code: IssueCode,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub refs: Vec<EntityRef>,
}

/// A severity-tagged finding scoped to a project snapshot and source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub snapshot_id: SnapshotId,
    pub source: IssueSource,
    pub code: IssueCode,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub refs: Vec<EntityRef>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    pub fn from_finding(
        project_id: ProjectId,
        snapshot_id: SnapshotId,
        source: IssueSource,
        finding: Finding,
    ) -> Self {
        Self {
            id: IssueId::new(),
            project_id,
            snapshot_id,
            source,
            code: finding.code,
            severity: finding.severity,
            title: finding.title,
            description: finding.description,
            refs: finding.refs,
            created_at: Utc::now(),
        }
    }
}
