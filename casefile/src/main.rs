//! Casefile command-line front end.
//!
//! Drives the engine against a JSON file store:
//!
//! ```bash
//! casefile --user alice init "雾港疑案"
//! casefile draft <project> --file truth.json
//! casefile lock <project>
//! casefile --user alice derive <project> role --stream
//! casefile gate <project>
//! ```

mod cli;
mod commands;

use anyhow::Context;
use casefile_core::prompt::StaticPrompts;
use casefile_core::provider::{ClaudeProvider, LlmProvider, UnavailableProvider};
use casefile_core::store::MemoryStore;
use casefile_core::{Casefile, EngineConfig};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("casefile error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose)?;

    let config = EngineConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    let store = MemoryStore::open(&config.store.path)
        .await
        .with_context(|| format!("failed to open store at {}", config.store.path.display()))?;

    let provider: Arc<dyn LlmProvider> = match ClaudeProvider::from_config(&config.provider) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::debug!(error = %e, "model provider unavailable");
            Arc::new(UnavailableProvider::new(e.to_string()))
        }
    };

    let engine = Casefile::new(
        &config,
        Arc::new(store),
        provider,
        Arc::new(StaticPrompts::new()),
    );
    let caller = commands::caller(cli.user);

    commands::dispatch(&engine, &caller, cli.command).await
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "casefile=debug,casefile_core=debug" } else { "casefile=info,casefile_core=info" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
