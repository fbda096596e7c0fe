//! Command handlers. Results are printed to stdout as pretty JSON.

use crate::cli::{Commands, DeriveArgs, DraftArgs};
use anyhow::{bail, Context};
use casefile_core::model::ActionType;
use casefile_core::{AuthContext, Casefile, DeriveEvent, DeriveOptions};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use tokio_util::sync::CancellationToken;

pub async fn dispatch(engine: &Casefile, caller: &AuthContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init { name } => {
            let owner = caller.user_id().cloned();
            print_json(&engine.create_project(name, owner).await?)
        }
        Commands::Draft(args) => draft(engine, args).await,
        Commands::Lock { project } => print_json(&engine.lock(project).await?),
        Commands::Unlock { project } => print_json(&engine.unlock(project).await?),
        Commands::History { project } => print_json(&engine.history(project).await?),
        Commands::Derive(args) => derive(engine, caller, args).await,
        Commands::Candidates { project, status } => print_json(
            &engine
                .list_candidates(caller, project, status.map(Into::into))
                .await?,
        ),
        Commands::Accept { candidate } => {
            print_json(&engine.accept_candidate(caller, candidate).await?)
        }
        Commands::Reject { candidate } => {
            print_json(&engine.reject_candidate(caller, candidate).await?)
        }
        Commands::Gate { project } => {
            let report = engine.run_gate(project).await?;
            print_json(&report)?;
            if !report.ok {
                bail!("project is not publishable");
            }
            Ok(())
        }
    }
}

/// The `--user` identity, if any.
pub fn caller(user: Option<String>) -> AuthContext {
    match user.filter(|u| !u.trim().is_empty()) {
        Some(user) => AuthContext::user(user),
        None => AuthContext::anonymous(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn draft(engine: &Casefile, args: DraftArgs) -> anyhow::Result<()> {
    let content = match (args.file, args.text) {
        (Some(path), _) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            document_from(&raw)
        }
        (None, Some(text)) => casefile_core::document::paragraph(&text),
        (None, None) => bail!("pass --file or --text"),
    };
    print_json(&engine.update_draft(args.project, content).await?)
}

/// A JSON document as-is, anything else as a paragraph of text.
fn document_from(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(doc @ Value::Object(_)) => doc,
        _ => casefile_core::document::paragraph(raw.trim()),
    }
}

fn options_for(args: &DeriveArgs) -> DeriveOptions {
    let mut options = DeriveOptions::new();
    let direct = args
        .action
        .parse::<ActionType>()
        .map(|a| a.supports_direct_commit())
        .unwrap_or(false);
    options = if direct && !args.staged {
        options.direct()
    } else {
        options.staged()
    };
    if let Some(snapshot) = args.snapshot {
        options = options.with_snapshot(snapshot);
    }
    if let Some(intent) = &args.intent {
        options = options.with_intent(intent);
    }
    options
}

async fn derive(engine: &Casefile, caller: &AuthContext, args: DeriveArgs) -> anyhow::Result<()> {
    let options = options_for(&args);
    if !args.stream {
        let outcome = engine
            .derive(caller, args.project, &args.action, options)
            .await?;
        return print_json(&outcome);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling derivation");
            on_interrupt.cancel();
        }
    });

    let mut events = engine
        .derive_stream(caller, args.project, &args.action, options, cancel.clone())
        .await?;

    let mut stderr = std::io::stderr();
    while let Some(event) = events.next().await {
        match event {
            DeriveEvent::Delta { content } => {
                write!(stderr, "{content}")?;
                stderr.flush()?;
            }
            DeriveEvent::Done(outcome) => {
                writeln!(stderr)?;
                return print_json(&outcome);
            }
            DeriveEvent::Error { message } => {
                writeln!(stderr)?;
                bail!("derivation failed: {message}");
            }
        }
    }

    if cancel.is_cancelled() {
        bail!("derivation cancelled");
    }
    bail!("derivation ended without a result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_core::model::{CommitMode, ProjectId};

    fn derive_args(action: &str, staged: bool) -> DeriveArgs {
        DeriveArgs {
            project: ProjectId::new(),
            action: action.to_string(),
            stream: false,
            staged,
            snapshot: None,
            intent: None,
        }
    }

    #[test]
    fn test_commit_mode_defaults() {
        assert_eq!(options_for(&derive_args("role", false)).commit_mode, CommitMode::Direct);
        assert_eq!(options_for(&derive_args("role", true)).commit_mode, CommitMode::Staged);
        assert_eq!(options_for(&derive_args("worldcheck", false)).commit_mode, CommitMode::Direct);
        assert_eq!(options_for(&derive_args("story", false)).commit_mode, CommitMode::Staged);
    }

    #[test]
    fn test_document_from_text_or_json() {
        let doc = document_from(r#"{"type":"doc","content":[]}"#);
        assert_eq!(doc["type"], "doc");
        assert_eq!(
            document_from("  凶手是管家\n"),
            casefile_core::document::paragraph("凶手是管家")
        );
    }

    #[test]
    fn test_blank_user_is_anonymous() {
        assert_eq!(caller(Some("  ".into())), AuthContext::anonymous());
        assert_eq!(caller(Some("alice".into())), AuthContext::user("alice"));
        assert_eq!(caller(None), AuthContext::anonymous());
    }
}
