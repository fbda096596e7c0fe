//! Error types surfaced by engine operations.
//!
//! Store and provider failures are converted here, at the operation boundary,
//! so callers only ever see an [`EngineError`] with a classified [`ErrorKind`].

use crate::model::{CandidateId, ProjectId, SnapshotId, UnknownAction};
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Classification of an [`EngineError`] for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Unauthenticated,
    UpstreamFailure,
    Internal,
}

impl ErrorKind {
    /// The HTTP status a route layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::UpstreamFailure => 502,
            ErrorKind::Internal => 500,
        }
    }
}

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("truth not found for project {0}")]
    TruthNotFound(ProjectId),

    #[error("snapshot {snapshot} not found in project {project}")]
    SnapshotNotFound {
        project: ProjectId,
        snapshot: SnapshotId,
    },

    #[error("candidate not found: {0}")]
    CandidateNotFound(CandidateId),

    /// The request is incompatible with the current state; the message says how
    /// to fix it.
    #[error("{0}")]
    Conflict(String),

    #[error("caller does not own project {0}")]
    Forbidden(ProjectId),

    #[error("authentication required")]
    Unauthenticated,

    #[error("model provider failed: {0}")]
    Upstream(#[from] ProviderError),

    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ProjectNotFound(_)
            | EngineError::TruthNotFound(_)
            | EngineError::SnapshotNotFound { .. }
            | EngineError::CandidateNotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::Unauthenticated => ErrorKind::Unauthenticated,
            EngineError::Upstream(_) => ErrorKind::UpstreamFailure,
            EngineError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        if matches!(
            err,
            StoreError::VersionConflict { .. } | StoreError::DuplicateProject(_)
        ) {
            return EngineError::Conflict(err.to_string());
        }
        match err {
            StoreError::TruthLocked(_) => EngineError::conflict("unlock truth first"),
            StoreError::ProjectNotFound(id) => EngineError::ProjectNotFound(id),
            StoreError::TruthNotFound(id) => EngineError::TruthNotFound(id),
            StoreError::CandidateNotFound(id) => EngineError::CandidateNotFound(id),
            other => EngineError::Store(other),
        }
    }
}

impl From<UnknownAction> for EngineError {
    fn from(err: UnknownAction) -> Self {
        EngineError::Conflict(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_classified() {
        let project = ProjectId::new();
        let err: EngineError = StoreError::ProjectNotFound(project).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: EngineError = StoreError::VersionConflict {
            project,
            version: 2,
            latest: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: EngineError = StoreError::Io(io).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.kind().status_code(), 500);
    }

    #[test]
    fn test_unknown_action_is_conflict() {
        let err: EngineError = "poster".parse::<crate::model::ActionType>().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "unsupported action: poster");
    }
}
