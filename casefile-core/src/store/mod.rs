//! Persistence boundary for engine records.
//!
//! Every method is one atomic unit of work: implementations must apply a
//! method's writes all-or-nothing and in isolation from concurrent calls.

mod memory;
mod persist;

pub use memory::MemoryStore;
pub use persist::{StoreFile, STORE_FORMAT_VERSION};

use crate::model::{
    CandidateId, CandidateRecord, CandidateStatus, GenerationLog, Issue, IssueSource,
    ModuleCollection, ModuleEntry, ModuleKind, Project, ProjectId, SnapshotId, Truth,
    TruthSnapshot, TruthStatus, UserId,
};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("truth not found for project {0}")]
    TruthNotFound(ProjectId),

    #[error("candidate not found: {0}")]
    CandidateNotFound(CandidateId),

    /// Unique `(project, version)` constraint violated.
    #[error("snapshot version {version} is not next for project {project} (latest is {latest})")]
    VersionConflict {
        project: ProjectId,
        version: u32,
        latest: u32,
    },

    #[error("truth of project {0} is locked")]
    TruthLocked(ProjectId),

    #[error("project already exists: {0}")]
    DuplicateProject(ProjectId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: u32, found: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Relational store used by the engine.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Projects and truth
    // ------------------------------------------------------------------

    /// Insert a project together with its initial truth.
    async fn create_project(&self, project: Project, truth: Truth) -> StoreResult<()>;

    async fn project(&self, id: ProjectId) -> StoreResult<Option<Project>>;

    /// Set the owner if the project has none. Returns the project as stored
    /// afterwards, whoever ended up owning it.
    async fn claim_owner(&self, id: ProjectId, user: &UserId) -> StoreResult<Project>;

    async fn truth(&self, project: ProjectId) -> StoreResult<Option<Truth>>;

    /// Replace the truth's content, creating a draft if the project has none.
    /// Fails with [`StoreError::TruthLocked`] if the truth is locked.
    async fn save_draft(&self, project: ProjectId, content: Value) -> StoreResult<Truth>;

    /// Change the truth's status. Fails if the project has no truth.
    async fn set_truth_status(&self, project: ProjectId, status: TruthStatus)
        -> StoreResult<Truth>;

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Append a snapshot, lock the truth and advance `Project::latest_version`.
    ///
    /// The snapshot's content is taken from the stored truth in the same
    /// atomic step, so a draft edit racing the lock can never be frozen
    /// under a version that does not hold it.
    ///
    /// Rejects with [`StoreError::VersionConflict`] unless
    /// `snapshot.version == latest_version + 1`.
    async fn append_snapshot(&self, snapshot: TruthSnapshot) -> StoreResult<()>;

    async fn snapshot(&self, id: SnapshotId) -> StoreResult<Option<TruthSnapshot>>;

    async fn latest_snapshot(&self, project: ProjectId) -> StoreResult<Option<TruthSnapshot>>;

    /// All snapshots of a project ordered by version.
    async fn snapshots(&self, project: ProjectId) -> StoreResult<Vec<TruthSnapshot>>;

    // ------------------------------------------------------------------
    // Module entries
    // ------------------------------------------------------------------

    /// Every collection of the project, in module order.
    async fn collections(&self, project: ProjectId) -> StoreResult<Vec<ModuleCollection>>;

    /// Insert or update one entry, preserving its position in the collection.
    async fn put_entry(&self, entry: ModuleEntry) -> StoreResult<()>;

    /// Delete every derived entry of the module and append `entries`.
    /// Hand-written entries (no snapshot) are kept.
    async fn replace_entries(
        &self,
        project: ProjectId,
        module: ModuleKind,
        entries: Vec<ModuleEntry>,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Staged candidates
    // ------------------------------------------------------------------

    async fn insert_candidates(&self, records: Vec<CandidateRecord>) -> StoreResult<()>;

    async fn candidate(&self, id: CandidateId) -> StoreResult<Option<CandidateRecord>>;

    async fn candidates(
        &self,
        project: ProjectId,
        status: Option<CandidateStatus>,
    ) -> StoreResult<Vec<CandidateRecord>>;

    /// Move a pending candidate to `status`, appending `entry` in the same unit
    /// of work when given. Returns `Ok(None)` without writing anything if the
    /// candidate is no longer pending.
    async fn resolve_candidate(
        &self,
        id: CandidateId,
        status: CandidateStatus,
        entry: Option<ModuleEntry>,
    ) -> StoreResult<Option<CandidateRecord>>;

    // ------------------------------------------------------------------
    // Issue ledger and generation log
    // ------------------------------------------------------------------

    /// Delete every issue for `(project, snapshot, source)` and insert `issues`.
    async fn replace_issues(
        &self,
        project: ProjectId,
        snapshot: SnapshotId,
        source: IssueSource,
        issues: Vec<Issue>,
    ) -> StoreResult<()>;

    /// Every issue recorded for the snapshot, across sources, in insertion order.
    async fn issues(&self, project: ProjectId, snapshot: SnapshotId) -> StoreResult<Vec<Issue>>;

    async fn append_generation_log(&self, log: GenerationLog) -> StoreResult<()>;

    async fn generation_logs(&self, project: ProjectId) -> StoreResult<Vec<GenerationLog>>;
}
