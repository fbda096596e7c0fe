//! Truth lifecycle: draft edits, locking into versioned snapshots, unlocking.
//!
//! A truth is editable while it is a draft. Locking freezes the current content
//! into a [`TruthSnapshot`] whose version is one past the project's latest.
//! Unlocking returns the truth to draft without touching any snapshot.

use crate::document;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    Project, ProjectId, SnapshotId, Truth, TruthId, TruthSnapshot, TruthStatus, UserId,
};
use crate::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`SnapshotService::lock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOutcome {
    pub snapshot_id: SnapshotId,
    pub version: u32,
    pub status: TruthStatus,
}

/// Truth id and status after an unlock or a draft edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruthState {
    pub truth_id: TruthId,
    pub status: TruthStatus,
}

impl From<&Truth> for TruthState {
    fn from(truth: &Truth) -> Self {
        Self {
            truth_id: truth.id,
            status: truth.status,
        }
    }
}

/// Snapshot store operations over a [`Store`].
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn Store>,
    lock_retry_limit: u32,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn Store>, lock_retry_limit: u32) -> Self {
        Self {
            store,
            lock_retry_limit,
        }
    }

    /// Create a project with an empty draft truth.
    pub async fn create_project(
        &self,
        name: impl Into<String>,
        owner: Option<UserId>,
    ) -> EngineResult<Project> {
        let project = Project::new(name, owner);
        let truth = Truth::draft(project.id, document::empty());
        self.store.create_project(project.clone(), truth).await?;
        info!(project = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    /// Freeze the truth into the next snapshot version.
    ///
    /// Locking an already locked truth returns its latest snapshot unchanged.
    /// Losing a version race to a concurrent lock retries from the top.
    pub async fn lock(&self, project_id: ProjectId) -> EngineResult<LockOutcome> {
        for attempt in 0..=self.lock_retry_limit {
            let project = self.project(project_id).await?;
            let truth = self
                .store
                .truth(project_id)
                .await?
                .ok_or(EngineError::TruthNotFound(project_id))?;

            if truth.is_locked() {
                if let Some(latest) = self.store.latest_snapshot(project_id).await? {
                    debug!(project = %project_id, version = latest.version, "truth already locked");
                    return Ok(LockOutcome {
                        snapshot_id: latest.id,
                        version: latest.version,
                        status: TruthStatus::Locked,
                    });
                }
            }

            let snapshot = TruthSnapshot::of(&truth, project.latest_version + 1);
            let outcome = LockOutcome {
                snapshot_id: snapshot.id,
                version: snapshot.version,
                status: TruthStatus::Locked,
            };
            match self.store.append_snapshot(snapshot).await {
                Ok(()) => {
                    info!(project = %project_id, version = outcome.version, "truth locked");
                    return Ok(outcome);
                }
                Err(StoreError::VersionConflict { latest, .. }) => {
                    warn!(
                        project = %project_id,
                        attempt = attempt + 1,
                        latest,
                        "snapshot version taken, retrying lock"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::conflict(format!(
            "could not lock truth after {} attempts",
            self.lock_retry_limit + 1
        )))
    }

    /// Return the truth to draft. Snapshots and derived content are kept.
    pub async fn unlock(&self, project_id: ProjectId) -> EngineResult<TruthState> {
        self.project(project_id).await?;
        let truth = self
            .store
            .set_truth_status(project_id, TruthStatus::Draft)
            .await?;
        info!(project = %project_id, "truth unlocked");
        Ok(TruthState::from(&truth))
    }

    /// Replace the draft's content wholesale.
    pub async fn update_draft(
        &self,
        project_id: ProjectId,
        content: Value,
    ) -> EngineResult<TruthState> {
        let truth = self.store.save_draft(project_id, content).await?;
        debug!(project = %project_id, "draft saved");
        Ok(TruthState::from(&truth))
    }

    pub async fn truth(&self, project_id: ProjectId) -> EngineResult<Truth> {
        self.store
            .truth(project_id)
            .await?
            .ok_or(EngineError::TruthNotFound(project_id))
    }

    /// Every snapshot of the project, oldest first.
    pub async fn history(&self, project_id: ProjectId) -> EngineResult<Vec<TruthSnapshot>> {
        self.project(project_id).await?;
        Ok(self.store.snapshots(project_id).await?)
    }

    /// Look up a snapshot, requiring it to belong to `project_id`.
    pub async fn snapshot(
        &self,
        project_id: ProjectId,
        snapshot_id: SnapshotId,
    ) -> EngineResult<TruthSnapshot> {
        self.store
            .snapshot(snapshot_id)
            .await?
            .filter(|s| s.project_id == project_id)
            .ok_or(EngineError::SnapshotNotFound {
                project: project_id,
                snapshot: snapshot_id,
            })
    }

    pub async fn latest(&self, project_id: ProjectId) -> EngineResult<Option<TruthSnapshot>> {
        Ok(self.store.latest_snapshot(project_id).await?)
    }

    async fn project(&self, project_id: ProjectId) -> EngineResult<Project> {
        self.store
            .project(project_id)
            .await?
            .ok_or(EngineError::ProjectNotFound(project_id))
    }
}
