//! Casefile - the primary public API of the engine.
//!
//! Wraps the snapshot store, derivation orchestrator, publish gate and issue
//! ledger behind one handle that route layers and the CLI call into.

use crate::auth::AuthContext;
use crate::config::EngineConfig;
use crate::derive::{DeriveOptions, DeriveOutcome, DeriveStream, Deriver};
use crate::error::{EngineError, EngineResult};
use crate::gate::{GateReport, PublishGate};
use crate::ledger::IssueLedger;
use crate::model::{
    CandidateId, CandidateRecord, CandidateStatus, GenerationLog, Issue, ModuleCollection,
    ModuleEntry, Project, ProjectId, SnapshotId, Truth, TruthSnapshot, UserId,
};
use crate::prompt::{PromptLoader, StaticPrompts};
use crate::provider::{ClaudeProvider, LlmProvider};
use crate::snapshot::{LockOutcome, SnapshotService, TruthState};
use crate::store::{MemoryStore, Store};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle to the truth versioning and consistency engine.
///
/// Cheap to clone; every clone shares the same store and provider.
#[derive(Clone)]
pub struct Casefile {
    store: Arc<dyn Store>,
    snapshots: SnapshotService,
    deriver: Deriver,
    gate: PublishGate,
    ledger: IssueLedger,
}

impl Casefile {
    /// Assemble an engine from its collaborators.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptLoader>,
    ) -> Self {
        let snapshots = SnapshotService::new(store.clone(), config.snapshot.lock_retry_limit);
        let deriver = Deriver::new(
            store.clone(),
            provider,
            prompts,
            snapshots.clone(),
            config.provider.temperature,
            config.derivation.stream_buffer,
        );
        Self {
            gate: PublishGate::new(store.clone()),
            ledger: IssueLedger::new(store.clone()),
            store,
            snapshots,
            deriver,
        }
    }

    /// Open the file-backed store and the Claude provider named by `config`.
    pub async fn open(config: &EngineConfig) -> EngineResult<Self> {
        let store = MemoryStore::open(&config.store.path).await?;
        let provider = ClaudeProvider::from_config(&config.provider)?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(provider),
            Arc::new(StaticPrompts::new()),
        ))
    }

    // ------------------------------------------------------------------
    // Projects and truth
    // ------------------------------------------------------------------

    pub async fn create_project(
        &self,
        name: impl Into<String>,
        owner: Option<UserId>,
    ) -> EngineResult<Project> {
        self.snapshots.create_project(name, owner).await
    }

    pub async fn project(&self, project_id: ProjectId) -> EngineResult<Project> {
        self.store
            .project(project_id)
            .await?
            .ok_or(EngineError::ProjectNotFound(project_id))
    }

    pub async fn truth(&self, project_id: ProjectId) -> EngineResult<Truth> {
        self.snapshots.truth(project_id).await
    }

    pub async fn update_draft(
        &self,
        project_id: ProjectId,
        content: Value,
    ) -> EngineResult<TruthState> {
        self.snapshots.update_draft(project_id, content).await
    }

    pub async fn lock(&self, project_id: ProjectId) -> EngineResult<LockOutcome> {
        self.snapshots.lock(project_id).await
    }

    pub async fn unlock(&self, project_id: ProjectId) -> EngineResult<TruthState> {
        self.snapshots.unlock(project_id).await
    }

    pub async fn history(&self, project_id: ProjectId) -> EngineResult<Vec<TruthSnapshot>> {
        self.snapshots.history(project_id).await
    }

    pub async fn snapshot(
        &self,
        project_id: ProjectId,
        snapshot_id: SnapshotId,
    ) -> EngineResult<TruthSnapshot> {
        self.snapshots.snapshot(project_id, snapshot_id).await
    }

    // ------------------------------------------------------------------
    // Module entries
    // ------------------------------------------------------------------

    /// Save a hand-written or edited entry.
    pub async fn put_entry(&self, entry: ModuleEntry) -> EngineResult<()> {
        Ok(self.store.put_entry(entry).await?)
    }

    pub async fn collections(&self, project_id: ProjectId) -> EngineResult<Vec<ModuleCollection>> {
        Ok(self.store.collections(project_id).await?)
    }

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    pub async fn derive(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        action: &str,
        options: DeriveOptions,
    ) -> EngineResult<DeriveOutcome> {
        self.deriver.derive(caller, project_id, action, options).await
    }

    pub async fn derive_stream(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        action: &str,
        options: DeriveOptions,
        cancel: CancellationToken,
    ) -> EngineResult<DeriveStream> {
        self.deriver
            .derive_stream(caller, project_id, action, options, cancel)
            .await
    }

    pub async fn list_candidates(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        status: Option<CandidateStatus>,
    ) -> EngineResult<Vec<CandidateRecord>> {
        self.deriver.list_candidates(caller, project_id, status).await
    }

    pub async fn accept_candidate(
        &self,
        caller: &AuthContext,
        id: CandidateId,
    ) -> EngineResult<ModuleEntry> {
        self.deriver.accept_candidate(caller, id).await
    }

    pub async fn reject_candidate(
        &self,
        caller: &AuthContext,
        id: CandidateId,
    ) -> EngineResult<CandidateRecord> {
        self.deriver.reject_candidate(caller, id).await
    }

    pub async fn generation_logs(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
    ) -> EngineResult<Vec<GenerationLog>> {
        self.deriver.generation_logs(caller, project_id).await
    }

    // ------------------------------------------------------------------
    // Publish gate
    // ------------------------------------------------------------------

    pub async fn run_gate(&self, project_id: ProjectId) -> EngineResult<GateReport> {
        self.gate.run(project_id).await
    }

    /// Every issue recorded for a snapshot, across sources.
    pub async fn issues(
        &self,
        project_id: ProjectId,
        snapshot_id: SnapshotId,
    ) -> EngineResult<Vec<Issue>> {
        self.ledger.list(project_id, snapshot_id).await
    }
}
