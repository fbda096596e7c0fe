//! In-process store, optionally mirrored to a JSON file.

use super::persist::StoreFile;
use super::{Store, StoreError, StoreResult};
use crate::model::{
    CandidateId, CandidateRecord, CandidateStatus, GenerationLog, Issue, IssueSource,
    ModuleCollection, ModuleEntry, ModuleKind, Project, ProjectId, SnapshotId, Truth,
    TruthSnapshot, TruthStatus, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Every record held by a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    projects: HashMap<ProjectId, Project>,
    /// The current truth, keyed by project.
    truths: HashMap<ProjectId, Truth>,
    snapshots: HashMap<SnapshotId, TruthSnapshot>,
    collections: Vec<ModuleCollection>,
    candidates: Vec<CandidateRecord>,
    issues: Vec<Issue>,
    generations: Vec<GenerationLog>,
}

impl StoreState {
    fn project_mut(&mut self, id: ProjectId) -> StoreResult<&mut Project> {
        self.projects
            .get_mut(&id)
            .ok_or(StoreError::ProjectNotFound(id))
    }

    fn collection_mut(&mut self, project: ProjectId, module: ModuleKind) -> &mut ModuleCollection {
        let position = self
            .collections
            .iter()
            .position(|c| c.project_id == project && c.module == module);
        match position {
            Some(i) => &mut self.collections[i],
            None => {
                self.collections
                    .push(ModuleCollection::new(project, module));
                let last = self.collections.len() - 1;
                &mut self.collections[last]
            }
        }
    }
}

/// A [`Store`] held in memory behind a single read/write lock.
///
/// Each trait method takes the lock once, so every method is atomic with
/// respect to every other. With a backing file, the file is rewritten before a
/// mutating method returns; a failed write leaves memory and file unchanged.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
        }
    }

    /// Open a file-backed store, starting empty if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if tokio::fs::try_exists(&path).await? {
            StoreFile::load(&path).await?.state
        } else {
            StoreState::default()
        };
        tracing::debug!(path = %path.display(), "opened store");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Apply `change` to a copy of the state, persist it, then publish it.
    async fn write<T>(
        &self,
        change: impl FnOnce(&mut StoreState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.state.write().await;
        let Some(path) = &self.path else {
            return change(&mut guard);
        };

        let mut next = guard.clone();
        let out = change(&mut next)?;
        if let Err(e) = StoreFile::new(next.clone()).save(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist store");
            return Err(e);
        }
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: Project, truth: Truth) -> StoreResult<()> {
        self.write(|state| {
            if state.projects.contains_key(&project.id) {
                return Err(StoreError::DuplicateProject(project.id));
            }
            state.truths.insert(project.id, truth);
            state.projects.insert(project.id, project);
            Ok(())
        })
        .await
    }

    async fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.state.read().await.projects.get(&id).cloned())
    }

    async fn claim_owner(&self, id: ProjectId, user: &UserId) -> StoreResult<Project> {
        self.write(|state| {
            let project = state.project_mut(id)?;
            if project.owner.is_none() {
                project.owner = Some(user.clone());
            }
            Ok(project.clone())
        })
        .await
    }

    async fn truth(&self, project: ProjectId) -> StoreResult<Option<Truth>> {
        Ok(self.state.read().await.truths.get(&project).cloned())
    }

    async fn save_draft(&self, project: ProjectId, content: Value) -> StoreResult<Truth> {
        self.write(|state| {
            state.project_mut(project)?;
            match state.truths.get_mut(&project) {
                Some(truth) if truth.is_locked() => Err(StoreError::TruthLocked(project)),
                Some(truth) => {
                    truth.content = content;
                    truth.updated_at = Utc::now();
                    Ok(truth.clone())
                }
                None => {
                    let truth = Truth::draft(project, content);
                    state.truths.insert(project, truth.clone());
                    Ok(truth)
                }
            }
        })
        .await
    }

    async fn set_truth_status(
        &self,
        project: ProjectId,
        status: TruthStatus,
    ) -> StoreResult<Truth> {
        self.write(|state| {
            let truth = state
                .truths
                .get_mut(&project)
                .ok_or(StoreError::TruthNotFound(project))?;
            if truth.status != status {
                truth.status = status;
                truth.updated_at = Utc::now();
            }
            Ok(truth.clone())
        })
        .await
    }

    async fn append_snapshot(&self, mut snapshot: TruthSnapshot) -> StoreResult<()> {
        self.write(|state| {
            let project_id = snapshot.project_id;
            let project = state.project_mut(project_id)?;
            if snapshot.version != project.latest_version + 1 {
                return Err(StoreError::VersionConflict {
                    project: project_id,
                    version: snapshot.version,
                    latest: project.latest_version,
                });
            }
            project.latest_version = snapshot.version;
            project.latest_snapshot = Some(snapshot.id);

            let truth = state
                .truths
                .get_mut(&project_id)
                .ok_or(StoreError::TruthNotFound(project_id))?;
            truth.status = TruthStatus::Locked;
            truth.updated_at = Utc::now();
            snapshot.truth_id = truth.id;
            snapshot.content = truth.content.clone();

            state.snapshots.insert(snapshot.id, snapshot);
            Ok(())
        })
        .await
    }

    async fn snapshot(&self, id: SnapshotId) -> StoreResult<Option<TruthSnapshot>> {
        Ok(self.state.read().await.snapshots.get(&id).cloned())
    }

    async fn latest_snapshot(&self, project: ProjectId) -> StoreResult<Option<TruthSnapshot>> {
        let state = self.state.read().await;
        Ok(state
            .projects
            .get(&project)
            .and_then(|p| p.latest_snapshot)
            .and_then(|id| state.snapshots.get(&id))
            .cloned())
    }

    async fn snapshots(&self, project: ProjectId) -> StoreResult<Vec<TruthSnapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<_> = state
            .snapshots
            .values()
            .filter(|s| s.project_id == project)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.version);
        Ok(snapshots)
    }

    async fn collections(&self, project: ProjectId) -> StoreResult<Vec<ModuleCollection>> {
        let state = self.state.read().await;
        let mut collections: Vec<_> = state
            .collections
            .iter()
            .filter(|c| c.project_id == project)
            .cloned()
            .collect();
        collections.sort_by_key(|c| c.module);
        Ok(collections)
    }

    async fn put_entry(&self, entry: ModuleEntry) -> StoreResult<()> {
        self.write(|state| {
            state.project_mut(entry.project_id)?;
            state
                .collection_mut(entry.project_id, entry.module)
                .upsert(entry);
            Ok(())
        })
        .await
    }

    async fn replace_entries(
        &self,
        project: ProjectId,
        module: ModuleKind,
        entries: Vec<ModuleEntry>,
    ) -> StoreResult<()> {
        self.write(|state| {
            state.project_mut(project)?;
            state.collection_mut(project, module).replace_derived(entries);
            Ok(())
        })
        .await
    }

    async fn insert_candidates(&self, records: Vec<CandidateRecord>) -> StoreResult<()> {
        self.write(|state| {
            state.candidates.extend(records);
            Ok(())
        })
        .await
    }

    async fn candidate(&self, id: CandidateId) -> StoreResult<Option<CandidateRecord>> {
        Ok(self
            .state
            .read()
            .await
            .candidates
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn candidates(
        &self,
        project: ProjectId,
        status: Option<CandidateStatus>,
    ) -> StoreResult<Vec<CandidateRecord>> {
        Ok(self
            .state
            .read()
            .await
            .candidates
            .iter()
            .filter(|c| c.project_id == project && status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn resolve_candidate(
        &self,
        id: CandidateId,
        status: CandidateStatus,
        entry: Option<ModuleEntry>,
    ) -> StoreResult<Option<CandidateRecord>> {
        self.write(|state| {
            let record = state
                .candidates
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(StoreError::CandidateNotFound(id))?;
            if record.status != CandidateStatus::Pending {
                return Ok(None);
            }
            record.status = status;
            record.updated_at = Utc::now();
            let record = record.clone();

            if let Some(entry) = entry {
                state
                    .collection_mut(entry.project_id, entry.module)
                    .upsert(entry);
            }
            Ok(Some(record))
        })
        .await
    }

    async fn replace_issues(
        &self,
        project: ProjectId,
        snapshot: SnapshotId,
        source: IssueSource,
        issues: Vec<Issue>,
    ) -> StoreResult<()> {
        self.write(|state| {
            state.issues.retain(|i| {
                !(i.project_id == project && i.snapshot_id == snapshot && i.source == source)
            });
            state.issues.extend(issues);
            Ok(())
        })
        .await
    }

    async fn issues(&self, project: ProjectId, snapshot: SnapshotId) -> StoreResult<Vec<Issue>> {
        Ok(self
            .state
            .read()
            .await
            .issues
            .iter()
            .filter(|i| i.project_id == project && i.snapshot_id == snapshot)
            .cloned()
            .collect())
    }

    async fn append_generation_log(&self, log: GenerationLog) -> StoreResult<()> {
        self.write(|state| {
            state.generations.push(log);
            Ok(())
        })
        .await
    }

    async fn generation_logs(&self, project: ProjectId) -> StoreResult<Vec<GenerationLog>> {
        Ok(self
            .state
            .read()
            .await
            .generations
            .iter()
            .filter(|g| g.project_id == project)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryMeta;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn seeded(store: &MemoryStore) -> ProjectId {
        let project = Project::new("雾港疑案", None);
        let id = project.id;
        store
            .create_project(project, Truth::draft(id, json!({"type": "doc"})))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_append_snapshot_enforces_next_version() {
        let store = MemoryStore::new();
        let project = seeded(&store).await;
        let truth = store.truth(project).await.unwrap().unwrap();

        store
            .append_snapshot(TruthSnapshot::of(&truth, 1))
            .await
            .unwrap();
        let err = store
            .append_snapshot(TruthSnapshot::of(&truth, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                version: 1,
                latest: 1,
                ..
            }
        ));

        let project = store.project(project).await.unwrap().unwrap();
        assert_eq!(project.latest_version, 1);
        assert!(store.truth(project.id).await.unwrap().unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_append_snapshot_freezes_stored_content() {
        let store = MemoryStore::new();
        let project = seeded(&store).await;
        let stale = store.truth(project).await.unwrap().unwrap();
        store
            .save_draft(project, json!({"type": "doc", "v": 2}))
            .await
            .unwrap();

        let snapshot = TruthSnapshot::of(&stale, 1);
        let id = snapshot.id;
        store.append_snapshot(snapshot).await.unwrap();

        let frozen = store.snapshot(id).await.unwrap().unwrap();
        let truth = store.truth(project).await.unwrap().unwrap();
        assert_eq!(frozen.content, json!({"type": "doc", "v": 2}));
        assert_eq!(frozen.content, truth.content);
        assert_eq!(frozen.truth_id, truth.id);
    }

    #[tokio::test]
    async fn test_save_draft_refuses_locked_truth() {
        let store = MemoryStore::new();
        let project = seeded(&store).await;
        let truth = store
            .save_draft(project, json!({"type": "doc", "v": 2}))
            .await
            .unwrap();
        store
            .append_snapshot(TruthSnapshot::of(&truth, 1))
            .await
            .unwrap();

        let err = store
            .save_draft(project, json!({"type": "doc", "v": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TruthLocked(_)));
        let stored = store.truth(project).await.unwrap().unwrap();
        assert_eq!(stored.content["v"], 2);
    }

    #[tokio::test]
    async fn test_claim_owner_keeps_first_claim() {
        let store = MemoryStore::new();
        let project = seeded(&store).await;

        let first = store.claim_owner(project, &UserId::new("alice")).await.unwrap();
        let second = store.claim_owner(project, &UserId::new("bob")).await.unwrap();
        assert_eq!(first.owner, Some(UserId::new("alice")));
        assert_eq!(second.owner, Some(UserId::new("alice")));
    }

    #[tokio::test]
    async fn test_file_backed_store_reloads_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("casefile.json");

        let project = {
            let store = MemoryStore::open(&path).await.unwrap();
            let project = seeded(&store).await;
            store
                .put_entry(ModuleEntry::new(
                    project,
                    "管家",
                    EntryMeta::empty(ModuleKind::Role),
                ))
                .await
                .unwrap();
            project
        };

        let reopened = MemoryStore::open(&path).await.unwrap();
        let collections = reopened.collections(project).await.unwrap();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].entries[0].name, "管家");
        assert!(reopened.truth(project).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolve_candidate_only_once() {
        let store = MemoryStore::new();
        let project = seeded(&store).await;
        let record = CandidateRecord::pending(
            project,
            SnapshotId::new(),
            crate::model::ActionType::Story,
            crate::extract::extract_candidates(r#"{"items":[{"title":"t"}]}"#).remove(0),
        );
        let id = record.id;
        store.insert_candidates(vec![record]).await.unwrap();

        let first = store
            .resolve_candidate(id, CandidateStatus::Rejected, None)
            .await
            .unwrap();
        let second = store
            .resolve_candidate(id, CandidateStatus::Accepted, None)
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.status), Some(CandidateStatus::Rejected));
        assert_eq!(second, None);
    }
}
