//! Derivation orchestrator.
//!
//! Binds a prompt, a truth snapshot and a target module into a provider request,
//! runs it (batch or streaming), extracts candidates from the raw output and
//! commits them according to the call's [`CommitMode`].
//!
//! Streaming derivations run on a spawned task that owns the only sender of an
//! event channel. The caller receives `delta` events as text arrives and then
//! exactly one terminal `done` or `error` event. Cancelling the token or
//! dropping the stream aborts the task: the provider stream is dropped, nothing
//! further is persisted and no further event is sent.

use crate::auth::{authorize, AuthContext};
use crate::document;
use crate::error::{EngineError, EngineResult};
use crate::extract::extract_candidates;
use crate::ledger::IssueLedger;
use crate::model::{
    ActionType, Candidate, CandidateId, CandidateRecord, CandidateStatus, CandidateSummary,
    CommitMode, EntityRef, EntryMeta, Finding, GenerationId, GenerationLog, IssueCode,
    IssueSource, ModuleEntry, ModuleKind, ProjectId, Severity, SnapshotId, TruthSnapshot,
};
use crate::prompt::{Prompt, PromptLoader};
use crate::provider::{CompletionRequest, Fragment, LlmProvider};
use crate::snapshot::SnapshotService;
use crate::store::Store;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call derivation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeriveOptions {
    /// Snapshot to derive from; the latest when `None`.
    pub snapshot_id: Option<SnapshotId>,
    /// Free-form author guidance passed to the model.
    pub intent: Option<String>,
    pub context: Option<Value>,
    pub commit_mode: CommitMode,
}

impl DeriveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot_id: SnapshotId) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn direct(mut self) -> Self {
        self.commit_mode = CommitMode::Direct;
        self
    }

    pub fn staged(mut self) -> Self {
        self.commit_mode = CommitMode::Staged;
        self
    }
}

/// Result of a completed derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveOutcome {
    pub provider: String,
    pub model: String,
    pub candidates: Vec<CandidateSummary>,
}

/// An event of a streaming derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeriveEvent {
    /// A fragment of raw model output.
    Delta { content: String },
    Done(DeriveOutcome),
    Error { message: String },
}

impl DeriveEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeriveEvent::Delta { .. })
    }

    /// Render as one server-sent-events frame.
    pub fn to_sse(&self) -> String {
        match serde_json::to_string(self) {
            Ok(data) => format!("data: {data}\n\n"),
            Err(e) => format!(
                "data: {}\n\n",
                json!({"type": "error", "message": e.to_string()})
            ),
        }
    }
}

/// Events of a streaming derivation.
pub type DeriveStream = ReceiverStream<DeriveEvent>;

/// Everything a derivation needs once its preconditions hold.
#[derive(Debug, Clone)]
struct Plan {
    project_id: ProjectId,
    action: ActionType,
    snapshot: TruthSnapshot,
    prompt: Prompt,
    request: CompletionRequest,
    commit_mode: CommitMode,
}

#[derive(Clone)]
pub struct Deriver {
    store: Arc<dyn Store>,
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptLoader>,
    snapshots: SnapshotService,
    ledger: IssueLedger,
    temperature: f32,
    stream_buffer: usize,
}

impl Deriver {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptLoader>,
        snapshots: SnapshotService,
        temperature: f32,
        stream_buffer: usize,
    ) -> Self {
        Self {
            ledger: IssueLedger::new(store.clone()),
            store,
            provider,
            prompts,
            snapshots,
            temperature,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Run a derivation as a single blocking completion.
    pub async fn derive(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        action: &str,
        options: DeriveOptions,
    ) -> EngineResult<DeriveOutcome> {
        let plan = self.prepare(caller, project_id, action, options).await?;

        let completion = match self.provider.complete(plan.request.clone()).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(project = %project_id, action = %plan.action, error = %e, "derivation failed");
                return Err(e.into());
            }
        };

        let candidates = extract_candidates(&completion.text);
        self.commit(&plan, &completion.model, candidates).await
    }

    /// Run a derivation as a stream of events.
    ///
    /// Precondition failures are returned as `Err` before anything is spawned.
    pub async fn derive_stream(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        action: &str,
        options: DeriveOptions,
        cancel: CancellationToken,
    ) -> EngineResult<DeriveStream> {
        let plan = self.prepare(caller, project_id, action, options).await?;
        let (tx, rx) = mpsc::channel(self.stream_buffer);

        let worker = self.clone();
        tokio::spawn(async move { worker.run_stream(plan, tx, cancel).await });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_stream(
        self,
        plan: Plan,
        tx: mpsc::Sender<DeriveEvent>,
        cancel: CancellationToken,
    ) {
        let project_id = plan.project_id;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(project = %project_id, action = %plan.action, "derivation aborted");
                return;
            }
            _ = tx.closed() => {
                info!(project = %project_id, action = %plan.action, "derivation aborted, receiver gone");
                return;
            }
            opened = self.provider.stream(plan.request.clone()) => opened,
        };

        let mut upstream = match opened {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(project = %project_id, action = %plan.action, error = %e, "derivation failed");
                let _ = tx.send(DeriveEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        let mut raw = String::new();
        let mut served = self.provider.model().to_string();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = tx.closed() => None,
                next = upstream.next() => Some(next),
            };
            let Some(next) = next else {
                info!(project = %project_id, action = %plan.action, received = raw.len(), "derivation aborted");
                return;
            };

            match next {
                Some(Ok(Fragment::Model(model))) => {
                    if !model.is_empty() {
                        served = model;
                    }
                }
                Some(Ok(Fragment::Text(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    raw.push_str(&fragment);
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        sent = tx.send(DeriveEvent::Delta { content: fragment }) => sent.is_ok(),
                    };
                    if !sent {
                        info!(project = %project_id, action = %plan.action, "derivation aborted");
                        return;
                    }
                }
                Some(Err(e)) => {
                    drop(upstream);
                    warn!(project = %project_id, action = %plan.action, error = %e, "derivation failed");
                    let _ = tx.send(DeriveEvent::Error { message: e.to_string() }).await;
                    return;
                }
                None => break,
            }
        }
        drop(upstream);

        if cancel.is_cancelled() || tx.is_closed() {
            info!(project = %project_id, action = %plan.action, "derivation aborted before commit");
            return;
        }

        let candidates = extract_candidates(&raw);
        let event = match self.commit(&plan, &served, candidates).await {
            Ok(outcome) => DeriveEvent::Done(outcome),
            Err(e) => {
                warn!(project = %project_id, action = %plan.action, error = %e, "derivation commit failed");
                DeriveEvent::Error { message: e.to_string() }
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        let _ = tx.send(event).await;
    }

    /// Check every precondition and build the provider request.
    async fn prepare(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        action: &str,
        options: DeriveOptions,
    ) -> EngineResult<Plan> {
        let action: ActionType = action.parse()?;
        authorize(self.store.as_ref(), caller, project_id).await?;

        let snapshot = match options.snapshot_id {
            Some(id) => self.snapshots.snapshot(project_id, id).await?,
            None => self
                .snapshots
                .latest(project_id)
                .await?
                .ok_or_else(|| EngineError::conflict("lock truth first"))?,
        };

        if options.commit_mode == CommitMode::Direct && !action.supports_direct_commit() {
            return Err(EngineError::conflict(format!(
                "action {action} does not support direct commit"
            )));
        }

        let prompt = self.prompts.prompt(action);
        let payload = json!({
            "action": action,
            "module": action.target(),
            "version": snapshot.version,
            "truth": snapshot.content.clone(),
            "intent": options.intent,
            "context": options.context,
        });
        let request = CompletionRequest {
            system_prompt: prompt.system.clone(),
            user_payload: payload.to_string(),
            temperature: self.temperature,
        };

        info!(
            project = %project_id,
            action = %action,
            version = snapshot.version,
            mode = options.commit_mode.as_str(),
            prompt = %prompt.id,
            "derivation started"
        );

        Ok(Plan {
            project_id,
            action,
            snapshot,
            prompt,
            request,
            commit_mode: options.commit_mode,
        })
    }

    /// Persist candidates per the plan's commit mode and log the generation.
    async fn commit(
        &self,
        plan: &Plan,
        model: &str,
        mut candidates: Vec<Candidate>,
    ) -> EngineResult<DeriveOutcome> {
        let target = plan.action.target();
        for candidate in &mut candidates {
            candidate.target = target;
        }
        let project_id = plan.project_id;
        let snapshot_id = plan.snapshot.id;

        let summaries = match (plan.commit_mode, target) {
            (CommitMode::Direct, Some(module)) => {
                let entries: Vec<ModuleEntry> = candidates
                    .iter()
                    .map(|c| entry_from_candidate(project_id, snapshot_id, module, c))
                    .collect();
                let summaries = entries
                    .iter()
                    .zip(&candidates)
                    .map(|(entry, c)| summarize(entry.id.to_string(), c))
                    .collect();
                self.store
                    .replace_entries(project_id, module, entries)
                    .await?;
                summaries
            }
            (CommitMode::Direct, None) => {
                let findings = candidates.iter().map(worldcheck_finding).collect();
                let issues = self
                    .ledger
                    .replace(project_id, snapshot_id, IssueSource::DerivationCheck, findings)
                    .await?;
                issues
                    .iter()
                    .zip(&candidates)
                    .map(|(issue, c)| summarize(issue.id.to_string(), c))
                    .collect()
            }
            (CommitMode::Staged, _) => {
                let records: Vec<CandidateRecord> = candidates
                    .iter()
                    .cloned()
                    .map(|c| CandidateRecord::pending(project_id, snapshot_id, plan.action, c))
                    .collect();
                let summaries = records
                    .iter()
                    .map(|r| summarize(r.id.to_string(), &r.candidate))
                    .collect();
                self.store.insert_candidates(records).await?;
                summaries
            }
        };

        self.store
            .append_generation_log(GenerationLog {
                id: GenerationId::new(),
                project_id,
                snapshot_id,
                action: plan.action,
                provider: self.provider.name().to_string(),
                model: model.to_string(),
                prompt_id: plan.prompt.id.clone(),
                commit_mode: plan.commit_mode,
                candidate_count: candidates.len(),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            project = %project_id,
            action = %plan.action,
            version = plan.snapshot.version,
            candidates = candidates.len(),
            "derivation finished"
        );

        Ok(DeriveOutcome {
            provider: self.provider.name().to_string(),
            model: model.to_string(),
            candidates: summaries,
        })
    }

    // ------------------------------------------------------------------
    // Staged candidate review
    // ------------------------------------------------------------------

    /// Staged candidates of a project, optionally filtered by status.
    pub async fn list_candidates(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
        status: Option<CandidateStatus>,
    ) -> EngineResult<Vec<CandidateRecord>> {
        authorize(self.store.as_ref(), caller, project_id).await?;
        Ok(self.store.candidates(project_id, status).await?)
    }

    /// Commit a pending candidate into its module.
    pub async fn accept_candidate(
        &self,
        caller: &AuthContext,
        id: CandidateId,
    ) -> EngineResult<ModuleEntry> {
        let record = self.pending_candidate(caller, id).await?;
        let module = record
            .candidate
            .target
            .or(record.action.target())
            .ok_or_else(|| {
                EngineError::conflict(format!(
                    "candidate from {} has no module to commit into",
                    record.action
                ))
            })?;

        let entry = entry_from_candidate(record.project_id, record.snapshot_id, module, &record.candidate);
        self.store
            .resolve_candidate(id, CandidateStatus::Accepted, Some(entry.clone()))
            .await?
            .ok_or_else(|| EngineError::conflict("candidate is no longer pending"))?;

        info!(project = %record.project_id, candidate = %id, module = %module, "candidate accepted");
        Ok(entry)
    }

    /// Mark a pending candidate rejected.
    pub async fn reject_candidate(
        &self,
        caller: &AuthContext,
        id: CandidateId,
    ) -> EngineResult<CandidateRecord> {
        self.pending_candidate(caller, id).await?;
        let record = self
            .store
            .resolve_candidate(id, CandidateStatus::Rejected, None)
            .await?
            .ok_or_else(|| EngineError::conflict("candidate is no longer pending"))?;

        debug!(project = %record.project_id, candidate = %id, "candidate rejected");
        Ok(record)
    }

    async fn pending_candidate(
        &self,
        caller: &AuthContext,
        id: CandidateId,
    ) -> EngineResult<CandidateRecord> {
        let record = self
            .store
            .candidate(id)
            .await?
            .ok_or(EngineError::CandidateNotFound(id))?;
        authorize(self.store.as_ref(), caller, record.project_id).await?;

        if record.status != CandidateStatus::Pending {
            return Err(EngineError::conflict("candidate is no longer pending"));
        }
        Ok(record)
    }

    /// Generation log of a project, oldest first.
    pub async fn generation_logs(
        &self,
        caller: &AuthContext,
        project_id: ProjectId,
    ) -> EngineResult<Vec<GenerationLog>> {
        authorize(self.store.as_ref(), caller, project_id).await?;
        Ok(self.store.generation_logs(project_id).await?)
    }
}

fn summarize(id: String, candidate: &Candidate) -> CandidateSummary {
    CandidateSummary {
        id,
        title: candidate.title.clone(),
        summary: candidate.summary.clone(),
        risk_flags: candidate.risk_flags.clone(),
    }
}

fn entry_from_candidate(
    project_id: ProjectId,
    snapshot_id: SnapshotId,
    module: ModuleKind,
    candidate: &Candidate,
) -> ModuleEntry {
    let meta = EntryMeta::from_attributes(module, &candidate.attributes, &candidate.refs);
    let entry = ModuleEntry::new(project_id, candidate.title.clone(), meta)
        .with_snapshot(snapshot_id)
        .with_content(candidate.content.clone());
    if candidate.risk_flags.is_empty() {
        entry
    } else {
        entry.flagged_for_review()
    }
}

fn is_blocking_flag(flag: &str) -> bool {
    let flag = flag.trim();
    flag.eq_ignore_ascii_case("p0") || flag.to_ascii_lowercase().contains("blocking")
}

fn worldcheck_finding(candidate: &Candidate) -> Finding {
    let severity = if candidate.risk_flags.iter().any(|f| is_blocking_flag(f)) {
        Severity::P0
    } else {
        Severity::P1
    };
    let description = candidate
        .summary
        .clone()
        .unwrap_or_else(|| document::plain_text(&candidate.content));
    Finding {
        code: IssueCode::WorldcheckRisk,
        severity,
        title: candidate.title.clone(),
        description,
        refs: candidate.refs.iter().map(EntityRef::opaque).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimelineMeta;
    use serde_json::json;

    fn candidate(raw: &str) -> Candidate {
        extract_candidates(raw).remove(0)
    }

    #[test]
    fn test_event_serialization() {
        let delta = DeriveEvent::Delta {
            content: "你好".into(),
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"type": "delta", "content": "你好"})
        );

        let done = DeriveEvent::Done(DeriveOutcome {
            provider: "scripted".into(),
            model: "m".into(),
            candidates: Vec::new(),
        });
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type": "done", "provider": "scripted", "model": "m", "candidates": []})
        );
        assert!(done.is_terminal());
        assert!(!delta.is_terminal());
    }

    #[test]
    fn test_to_sse_frame() {
        let event = DeriveEvent::Error {
            message: "boom".into(),
        };
        assert_eq!(event.to_sse(), "data: {\"type\":\"error\",\"message\":\"boom\"}\n\n");
    }

    #[test]
    fn test_entry_from_candidate_flags_risky_items() {
        let c = candidate(
            r#"{"items":[{"title":"晚宴","risk_flags":["时间存疑"],
                "meta":{"timePoint":"20:00","participants":["管家","女仆"]}}]}"#,
        );
        let entry = entry_from_candidate(ProjectId::new(), SnapshotId::new(), ModuleKind::Timeline, &c);
        assert!(entry.needs_review);
        assert_eq!(
            entry.meta,
            EntryMeta::Timeline(TimelineMeta {
                time_point: Some("20:00".into()),
                participants: vec!["管家".into(), "女仆".into()],
                location: None,
            })
        );
    }

    #[test]
    fn test_worldcheck_severity() {
        let blocking = candidate(r#"{"items":[{"title":"a","risk_flags":["P0"]}]}"#);
        let also_blocking = candidate(r#"{"items":[{"title":"b","riskFlags":["Blocking: 动机矛盾"]}]}"#);
        let advisory = candidate(r#"{"items":[{"title":"c","summary":"小问题","risk_flags":["P1"]}]}"#);

        assert_eq!(worldcheck_finding(&blocking).severity, Severity::P0);
        assert_eq!(worldcheck_finding(&also_blocking).severity, Severity::P0);
        let finding = worldcheck_finding(&advisory);
        assert_eq!(finding.severity, Severity::P1);
        assert_eq!(finding.description, "小问题");
    }
}
