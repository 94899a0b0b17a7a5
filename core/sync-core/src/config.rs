//! Sync settings loaded from `config.toml`.
//!
//! Every field has a default, so a missing file (or a missing table) yields the
//! stock configuration. A file that exists but does not parse is an error.

use std::path::Path;
use std::time::Duration;

use measview_protocol::{keys, MutableFieldSet, DEFAULT_EDITABLE_KEYS, DEFAULT_NUMERIC_KEYS};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::record::IdentityField;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_field")]
    pub field: String,
    #[serde(default = "default_identity_aliases")]
    pub aliases: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            field: default_identity_field(),
            aliases: default_identity_aliases(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EditorConfig {
    /// Store keys tried in order when the editor loads its dataset.
    #[serde(default = "default_candidate_keys")]
    pub candidate_keys: Vec<String>,
    #[serde(default = "default_editable_keys")]
    pub editable_keys: Vec<String>,
    #[serde(default = "default_numeric_keys")]
    pub numeric_keys: Vec<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            candidate_keys: default_candidate_keys(),
            editable_keys: default_editable_keys(),
            numeric_keys: default_numeric_keys(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LivenessConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl LivenessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl SyncConfig {
    pub fn identity_field(&self) -> IdentityField {
        IdentityField::new(self.identity.field.clone()).with_aliases(self.identity.aliases.clone())
    }

    /// Fallback whitelist when the parent did not publish `mutableFields`.
    pub fn default_mutable_fields(&self) -> MutableFieldSet {
        MutableFieldSet::new(self.editor.editable_keys.clone())
            .with_numeric(self.editor.numeric_keys.clone())
    }
}

fn default_identity_field() -> String {
    "groupIndex".to_string()
}

fn default_identity_aliases() -> Vec<String> {
    ["GroupIndex", "group_index", "groupindex", "GROUPINDEX"]
        .iter()
        .map(|alias| alias.to_string())
        .collect()
}

fn default_candidate_keys() -> Vec<String> {
    keys::DEFAULT_CANDIDATES
        .iter()
        .map(|key| key.to_string())
        .collect()
}

fn default_editable_keys() -> Vec<String> {
    DEFAULT_EDITABLE_KEYS.iter().map(|key| key.to_string()).collect()
}

fn default_numeric_keys() -> Vec<String> {
    DEFAULT_NUMERIC_KEYS.iter().map(|key| key.to_string()).collect()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

/// Loads settings from `path`, returning defaults when the file is missing.
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|err| SyncError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })?;
    toml::from_str::<SyncConfig>(&content).map_err(|err| SyncError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
