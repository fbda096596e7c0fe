//! Caller identity and project ownership checks.

use crate::error::{EngineError, EngineResult};
use crate::model::{Project, ProjectId, UserId};
use crate::store::Store;

/// Identity supplied by the authentication layer; `None` means anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    user: Option<UserId>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(UserId::new(id)),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref()
    }
}

/// Check that the caller owns the project, letting the first caller claim an
/// ownerless one.
pub async fn authorize(
    store: &dyn Store,
    caller: &AuthContext,
    project_id: ProjectId,
) -> EngineResult<Project> {
    let user = caller.user_id().ok_or(EngineError::Unauthenticated)?;
    let project = store
        .project(project_id)
        .await?
        .ok_or(EngineError::ProjectNotFound(project_id))?;

    let project = match &project.owner {
        Some(_) => project,
        None => {
            let claimed = store.claim_owner(project_id, user).await?;
            if claimed.owner.as_ref() == Some(user) {
                tracing::info!(project = %project_id, user = %user, "project claimed");
            }
            claimed
        }
    };

    if project.owner.as_ref() != Some(user) {
        return Err(EngineError::Forbidden(project_id));
    }
    Ok(project)
}
