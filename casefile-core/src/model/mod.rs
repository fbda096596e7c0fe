//! Records owned by the engine.

mod action;
mod candidate;
mod ids;
mod issue;
mod module;
mod truth;

pub use action::{ActionType, CommitMode, UnknownAction};
pub use candidate::{Candidate, CandidateRecord, CandidateStatus, CandidateSummary, GenerationLog};
pub use ids::{
    CandidateId, EntryId, GenerationId, IssueId, ProjectId, SnapshotId, TruthId, UserId,
};
pub use issue::{EntityRef, Finding, Issue, IssueCode, IssueSource, Severity};
pub use module::{
    ClueMeta, DmMeta, EntryMeta, ModuleCollection, ModuleEntry, ModuleKind, RoleMeta, TimelineMeta,
};
pub use truth::{Project, Truth, TruthSnapshot, TruthStatus};

pub(crate) use module::as_text;
