//! Truth versioning and narrative consistency engine for murder-mystery scripts.
//!
//! This crate provides:
//! - A snapshot store that freezes a draft truth into immutable, versioned snapshots
//! - A tolerant extractor that turns raw model output into candidates
//! - A derivation orchestrator (batch and streaming) that commits candidates
//!   directly into modules or stages them for review
//! - A publish gate that checks roles, clues and the timeline for consistency
//!   and records its findings in the issue ledger
//!
//! # Quick Start
//!
//! ```ignore
//! use casefile_core::{AuthContext, Casefile, DeriveOptions, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load_with_dotenv(None)?;
//!     let engine = Casefile::open(&config).await?;
//!     let me = AuthContext::user("author");
//!
//!     let project = engine.create_project("雾港疑案", None).await?;
//!     engine.lock(project.id).await?;
//!     engine
//!         .derive(&me, project.id, "role", DeriveOptions::new().direct())
//!         .await?;
//!
//!     let report = engine.run_gate(project.id).await?;
//!     println!("publishable: {}", report.ok);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod derive;
pub mod document;
pub mod engine;
pub mod error;
pub mod extract;
pub mod gate;
pub mod ledger;
pub mod model;
pub mod prompt;
pub mod provider;
pub mod snapshot;
pub mod store;
pub mod testing;

// Primary public API
pub use auth::AuthContext;
pub use config::{ConfigError, EngineConfig};
pub use derive::{DeriveEvent, DeriveOptions, DeriveOutcome, DeriveStream};
pub use engine::Casefile;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use extract::extract_candidates;
pub use gate::{GateReport, IssueSummary};
pub use snapshot::{LockOutcome, TruthState};
pub use testing::{Fixture, ScriptedProvider};
