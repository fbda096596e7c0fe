//! The persisted issue set, regenerated per `(project, snapshot, source)`.

use crate::error::EngineResult;
use crate::model::{Finding, Issue, IssueSource, ProjectId, SnapshotId};
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct IssueLedger {
    store: Arc<dyn Store>,
}

impl IssueLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Swap the issues of one source for `findings`, leaving other sources alone.
    pub async fn replace(
        &self,
        project: ProjectId,
        snapshot: SnapshotId,
        source: IssueSource,
        findings: Vec<Finding>,
    ) -> EngineResult<Vec<Issue>> {
        let issues: Vec<Issue> = findings
            .into_iter()
            .map(|f| Issue::from_finding(project, snapshot, source, f))
            .collect();
        self.store
            .replace_issues(project, snapshot, source, issues.clone())
            .await?;
        tracing::debug!(
            project = %project,
            snapshot = %snapshot,
            source = %source,
            count = issues.len(),
            "issue ledger replaced"
        );
        Ok(issues)
    }

    /// Every issue recorded for the snapshot, across sources.
    pub async fn list(&self, project: ProjectId, snapshot: SnapshotId) -> EngineResult<Vec<Issue>> {
        Ok(self.store.issues(project, snapshot).await?)
    }
}
