//! Publish gate: decides whether a project's derived modules are consistent
//! enough to publish against its latest snapshot.

mod rules;

pub use rules::{check, split_participants};

use crate::error::{EngineError, EngineResult};
use crate::ledger::IssueLedger;
use crate::model::{
    Issue, IssueCode, IssueId, IssueSource, ModuleKind, ProjectId, Severity, SnapshotId,
};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Short form of a blocking issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub id: IssueId,
    pub code: IssueCode,
    pub title: String,
}

/// Verdict of one gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub ok: bool,
    pub truth_snapshot_id: Option<SnapshotId>,
    pub missing_modules: Vec<ModuleKind>,
    pub needs_review_modules: Vec<ModuleKind>,
    pub p0_issue_count: usize,
    pub p0_issues: Vec<IssueSummary>,
    /// Every issue recorded for the snapshot, across sources.
    pub issues: Vec<Issue>,
}

impl GateReport {
    fn without_snapshot() -> Self {
        Self {
            ok: false,
            truth_snapshot_id: None,
            missing_modules: Vec::new(),
            needs_review_modules: Vec::new(),
            p0_issue_count: 0,
            p0_issues: Vec::new(),
            issues: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct PublishGate {
    store: Arc<dyn Store>,
    ledger: IssueLedger,
}

impl PublishGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            ledger: IssueLedger::new(store.clone()),
            store,
        }
    }

    /// Validate the project's modules and regenerate its publish issues.
    pub async fn run(&self, project_id: ProjectId) -> EngineResult<GateReport> {
        self.store
            .project(project_id)
            .await?
            .ok_or(EngineError::ProjectNotFound(project_id))?;

        let Some(snapshot) = self.store.latest_snapshot(project_id).await? else {
            info!(project = %project_id, "gate skipped, no snapshot");
            return Ok(GateReport::without_snapshot());
        };

        let collections = self.store.collections(project_id).await?;

        let populated: BTreeSet<ModuleKind> = collections
            .iter()
            .filter(|c| !c.entries.is_empty())
            .map(|c| c.module)
            .collect();
        let missing_modules: Vec<ModuleKind> = ModuleKind::REQUIRED
            .into_iter()
            .filter(|m| !populated.contains(m))
            .collect();
        let needs_review_modules: Vec<ModuleKind> = collections
            .iter()
            .filter(|c| c.entries.iter().any(|e| e.needs_review))
            .map(|c| c.module)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let findings = check(&collections);
        self.ledger
            .replace(project_id, snapshot.id, IssueSource::Publish, findings)
            .await?;

        let issues = self.ledger.list(project_id, snapshot.id).await?;
        let p0_issues: Vec<IssueSummary> = issues
            .iter()
            .filter(|i| i.severity == Severity::P0)
            .map(|i| IssueSummary {
                id: i.id,
                code: i.code,
                title: i.title.clone(),
            })
            .collect();

        let ok = missing_modules.is_empty() && needs_review_modules.is_empty() && p0_issues.is_empty();
        info!(
            project = %project_id,
            version = snapshot.version,
            ok,
            issues = issues.len(),
            p0 = p0_issues.len(),
            "gate run"
        );

        Ok(GateReport {
            ok,
            truth_snapshot_id: Some(snapshot.id),
            missing_modules,
            needs_review_modules,
            p0_issue_count: p0_issues.len(),
            p0_issues,
            issues,
        })
    }
}
