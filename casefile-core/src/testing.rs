//! Testing utilities for the engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedProvider` for deterministic derivations without API calls
//! - `Fixture` for an engine over an in-memory store with an owned project

use crate::auth::AuthContext;
use crate::config::EngineConfig;
use crate::engine::Casefile;
use crate::error::EngineResult;
use crate::model::{ModuleEntry, ProjectId, UserId};
use crate::prompt::StaticPrompts;
use crate::provider::{
    Completion, CompletionRequest, Fragment, LlmProvider, ProviderError, TextStream,
};
use crate::snapshot::LockOutcome;
use crate::store::MemoryStore;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a scripted stream does after its last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// End the stream normally.
    Finish,
    /// Yield a stream error.
    Fail(String),
    /// Never yield again; only cancellation ends the derivation.
    Hang,
}

/// A provider that replays scripted output.
///
/// Use this for deterministic integration tests without API calls.
pub struct ScriptedProvider {
    chunks: Vec<String>,
    end: ScriptEnd,
    /// Fail when the request is opened, before any chunk.
    refuse: Option<String>,
    model: String,
    /// Model reported back as having served the request.
    served: String,
    requests: Mutex<Vec<CompletionRequest>>,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    /// Stream `chunks` in order, then finish.
    pub fn new<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            end: ScriptEnd::Finish,
            refuse: None,
            model: "scripted-model".to_string(),
            served: "scripted-model".to_string(),
            requests: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer with a single chunk of text.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new([text.into()])
    }

    /// Fail every request with an API error.
    pub fn refusing(message: impl Into<String>) -> Self {
        let mut provider = Self::new(Vec::<String>::new());
        provider.refuse = Some(message.into());
        provider
    }

    /// Yield a stream error after the scripted chunks.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.end = ScriptEnd::Fail(message.into());
        self
    }

    /// Report `model` as the one that served each request, the way an
    /// upstream alias resolves to a dated model.
    pub fn serving(mut self, model: impl Into<String>) -> Self {
        self.served = model.into();
        self
    }

    /// Stay open after the scripted chunks.
    pub fn then_hang(mut self) -> Self {
        self.end = ScriptEnd::Hang;
        self
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: CompletionRequest) -> Result<(), ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match &self.refuse {
            Some(message) => Err(ProviderError::Api {
                status: 529,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Counts a stream as open until dropped.
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.record(request)?;
        if let ScriptEnd::Fail(message) = &self.end {
            return Err(ProviderError::Api {
                status: 500,
                message: message.clone(),
            });
        }
        Ok(Completion {
            text: self.chunks.concat(),
            model: self.served.clone(),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, ProviderError> {
        self.record(request)?;

        let guard = OpenGuard::new(self.open_streams.clone());
        let body = stream::iter(
            std::iter::once(Fragment::Model(self.served.clone()))
                .chain(self.chunks.clone().into_iter().map(Fragment::Text))
                .map(Ok),
        );
        let tail = match &self.end {
            ScriptEnd::Finish => stream::empty().boxed(),
            ScriptEnd::Fail(message) => {
                stream::once(futures::future::ready(Err(ProviderError::Stream(message.clone()))))
                    .boxed()
            }
            ScriptEnd::Hang => stream::pending().boxed(),
        };

        Ok(Box::pin(body.chain(tail).map(move |item| {
            let _held = &guard;
            item
        })))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// An engine over an in-memory store, with one author identity.
pub struct Fixture {
    pub engine: Casefile,
    pub provider: Arc<ScriptedProvider>,
    pub author: AuthContext,
}

impl Fixture {
    pub const AUTHOR: &'static str = "author";

    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    pub fn with_config(provider: ScriptedProvider, config: EngineConfig) -> Self {
        let provider = Arc::new(provider);
        let engine = Casefile::new(
            &config,
            Arc::new(MemoryStore::new()),
            provider.clone(),
            Arc::new(StaticPrompts::new()),
        );
        Self {
            engine,
            provider,
            author: AuthContext::user(Self::AUTHOR),
        }
    }

    /// A project owned by the fixture's author.
    pub async fn project(&self) -> EngineResult<ProjectId> {
        let project = self
            .engine
            .create_project("测试剧本", Some(UserId::new(Self::AUTHOR)))
            .await?;
        Ok(project.id)
    }

    /// A project whose truth holds `content` and has been locked once.
    pub async fn locked_project(&self, content: Value) -> EngineResult<(ProjectId, LockOutcome)> {
        let project = self.project().await?;
        self.engine.update_draft(project, content).await?;
        let locked = self.engine.lock(project).await?;
        Ok((project, locked))
    }

    /// Save entries as if written by hand.
    pub async fn put_entries(
        &self,
        entries: impl IntoIterator<Item = ModuleEntry>,
    ) -> EngineResult<()> {
        for entry in entries {
            self.engine.put_entry(entry).await?;
        }
        Ok(())
    }
}
