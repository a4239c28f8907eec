use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use trellis_sentinel::CodecOptions;

pub const DEFAULT_CONFIG_NAME: &str = "trellis.config.json";

/// Synchronization configuration file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Options passed to the writer and reader
    pub codec: CodecOptions,

    /// Leave the file untouched when the written bytes are unchanged
    pub write_only_if_changed: bool,

    /// Write through a temporary file and rename
    pub atomic_writes: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            codec: CodecOptions::default(),
            write_only_if_changed: true,
            atomic_writes: true,
        }
    }
}

impl SyncOptions {
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load config from a directory, falling back to defaults when there is
    /// no config file
    pub fn load(dir: &Path) -> SyncResult<Self> {
        let config_path = dir.join(DEFAULT_CONFIG_NAME);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        Self::from_json(&content)
    }
}
