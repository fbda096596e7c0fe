//! Save-file format for [`MemoryStore`](super::MemoryStore).
//!
//! The whole store is written as one pretty-printed JSON document carrying a
//! format version that is checked on load.

use super::memory::StoreState;
use super::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Current save file version.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// A saved store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFile {
    /// Save format version for compatibility checking.
    pub format_version: u32,

    /// When the file was written.
    pub saved_at: DateTime<Utc>,

    /// Every record in the store.
    pub state: StoreState,
}

impl StoreFile {
    pub fn new(state: StoreState) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            saved_at: Utc::now(),
            state,
        }
    }

    /// Write to `path`, replacing the previous file only once the new one is complete.
    pub async fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load from `path`, rejecting files written by another format version.
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::FormatMismatch {
                expected: STORE_FORMAT_VERSION,
                found: saved.format_version,
            });
        }

        Ok(saved)
    }
}
