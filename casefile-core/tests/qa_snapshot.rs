//! QA tests for the truth lifecycle: drafts, locks, versioned snapshots.
//!
//! Run with: `cargo test -p casefile-core --test qa_snapshot`

use casefile_core::model::{ProjectId, TruthStatus};
use casefile_core::{EngineConfig, ErrorKind, Fixture, ScriptedProvider};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;

fn fixture() -> Fixture {
    Fixture::new(ScriptedProvider::replying("{}"))
}

fn doc(text: &str) -> serde_json::Value {
    casefile_core::document::paragraph(text)
}

// =============================================================================
// Versioning
// =============================================================================

#[tokio::test]
async fn test_sequential_locks_produce_gap_free_versions() {
    let fx = fixture();
    let project = fx.project().await.unwrap();

    for round in 1..=4u32 {
        fx.engine
            .update_draft(project, doc(&format!("第{round}稿")))
            .await
            .unwrap();
        let locked = fx.engine.lock(project).await.unwrap();
        assert_eq!(locked.version, round);
        fx.engine.unlock(project).await.unwrap();
    }

    let versions: Vec<u32> = fx
        .engine
        .history(project)
        .await
        .unwrap()
        .iter()
        .map(|s| s.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert_eq!(fx.engine.project(project).await.unwrap().latest_version, 4);
}

#[tokio::test]
async fn test_lock_twice_returns_same_snapshot() {
    let fx = fixture();
    let (project, first) = fx.locked_project(doc("真相")).await.unwrap();

    let second = fx.engine.lock(project).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.engine.history(project).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_snapshot_content_is_frozen_at_lock_time() {
    let fx = fixture();
    let (project, v1) = fx.locked_project(doc("初稿")).await.unwrap();

    fx.engine.unlock(project).await.unwrap();
    fx.engine.update_draft(project, doc("修改稿")).await.unwrap();

    let snapshot = fx.engine.snapshot(project, v1.snapshot_id).await.unwrap();
    assert_eq!(snapshot.content, doc("初稿"));
    assert_eq!(fx.engine.truth(project).await.unwrap().content, doc("修改稿"));
}

// =============================================================================
// Draft edits
// =============================================================================

#[tokio::test]
async fn test_locked_truth_rejects_edits() {
    let fx = fixture();
    let (project, _) = fx.locked_project(doc("真相")).await.unwrap();

    let err = fx
        .engine
        .update_draft(project, doc("偷偷修改"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(fx.engine.truth(project).await.unwrap().content, doc("真相"));
}

#[tokio::test]
async fn test_unlock_keeps_history() {
    let fx = fixture();
    let (project, locked) = fx.locked_project(doc("真相")).await.unwrap();

    let state = fx.engine.unlock(project).await.unwrap();
    assert_eq!(state.status, TruthStatus::Draft);

    let history = fx.engine.history(project).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, locked.snapshot_id);

    // unlocking twice is a no-op
    let again = fx.engine.unlock(project).await.unwrap();
    assert_eq!(again, state);
}

#[tokio::test]
async fn test_update_draft_replaces_content_wholesale() {
    let fx = fixture();
    let project = fx.project().await.unwrap();

    fx.engine
        .update_draft(project, json!({"type": "doc", "a": 1}))
        .await
        .unwrap();
    fx.engine
        .update_draft(project, json!({"type": "doc", "b": 2}))
        .await
        .unwrap();

    let truth = fx.engine.truth(project).await.unwrap();
    assert_eq!(truth.content, json!({"type": "doc", "b": 2}));
    assert!(truth.updated_at >= truth.created_at);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_locks_create_one_snapshot() {
    let fx = fixture();
    let project = fx.project().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.lock(project).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let ids: HashSet<_> = outcomes.iter().map(|o| o.snapshot_id).collect();
    assert_eq!(ids.len(), 1);
    assert!(outcomes.iter().all(|o| o.version == 1));
    assert_eq!(fx.engine.history(project).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_lock_unlock_cycles_stay_gap_free() {
    let mut config = EngineConfig::default();
    config.snapshot.lock_retry_limit = 100;
    let fx = Fixture::with_config(ScriptedProvider::replying("{}"), config);
    let project = fx.project().await.unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let engine = fx.engine.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    engine.lock(project).await?;
                    engine.unlock(project).await?;
                }
                Ok::<_, casefile_core::EngineError>(())
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let versions: Vec<u32> = fx
        .engine
        .history(project)
        .await
        .unwrap()
        .iter()
        .map(|s| s.version)
        .collect();
    let expected: Vec<u32> = (1..=versions.len() as u32).collect();
    assert_eq!(versions, expected);
    assert_eq!(
        fx.engine.project(project).await.unwrap().latest_version as usize,
        versions.len()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_draft_edit_racing_lock_never_splits_truth_and_snapshot() {
    let fx = fixture();
    let project = fx.project().await.unwrap();

    for round in 0..40u32 {
        let editor = {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.update_draft(project, doc(&format!("第{round}稿"))).await })
        };
        let locker = {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.lock(project).await })
        };

        // The edit may lose to the lock and be refused; either order is fine.
        let _ = editor.await.unwrap();
        let locked = locker.await.unwrap().unwrap();

        let truth = fx.engine.truth(project).await.unwrap();
        let frozen = fx.engine.snapshot(project, locked.snapshot_id).await.unwrap();
        assert_eq!(truth.status, TruthStatus::Locked);
        assert_eq!(frozen.content, truth.content, "round {round}");

        fx.engine.unlock(project).await.unwrap();
    }
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let fx = fixture();
    let missing = ProjectId::new();

    assert_eq!(fx.engine.lock(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(fx.engine.unlock(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        fx.engine.update_draft(missing, doc("x")).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(fx.engine.history(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
}
