//! Layered engine configuration loaded with figment.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`CASEFILE_*`, `__` separates sections, e.g.
//!    `CASEFILE_PROVIDER__MODEL`)
//! 2. A TOML file (`casefile.toml` in the working directory, or an explicit path)
//! 3. Built-in defaults
//!
//! The provider API key additionally falls back to `ANTHROPIC_API_KEY`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "casefile.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment extraction or merge error.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// A configuration field has an invalid value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Language-model provider settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// API root; `None` uses the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// The configured key, or `ANTHROPIC_API_KEY` from the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

/// Snapshot store settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// How many times `lock` retries after losing a version race.
    pub lock_retry_limit: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            lock_retry_limit: 5,
        }
    }
}

/// Derivation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DerivationConfig {
    /// Capacity of the event channel between a streaming derivation and its caller.
    pub stream_buffer: usize,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self { stream_buffer: 64 }
    }
}

/// Where the file-backed store lives.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".casefile/store.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub derivation: DerivationConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load from defaults, the TOML file and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`EngineConfig::load`], reading `.env` first.
    pub fn load_with_dotenv(file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load(file)
    }

    /// The provider chain, exposed so tests can layer more on top.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment.merge(Env::prefixed("CASEFILE_").split("__"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "provider.temperature".to_string(),
                reason: format!("{} is outside 0.0..=1.0", self.provider.temperature),
            });
        }
        if self.derivation.stream_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "derivation.stream_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
