//! Storage paths for MeasView data.
//!
//! Production code uses `StorageConfig::default()` which points to `~/.measview/`
//! (or `$MEASVIEW_HOME`). Tests use `StorageConfig::with_root(temp_dir)`.

use std::env;
use std::path::{Path, PathBuf};

const ROOT_ENV: &str = "MEASVIEW_HOME";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        if let Some(root) = env::var_os(ROOT_ENV).filter(|value| !value.is_empty()) {
            return Self {
                root: PathBuf::from(root),
            };
        }
        let root = dirs::home_dir()
            .map(|home| home.join(".measview"))
            .unwrap_or_else(|| env::temp_dir().join("measview"));
        Self { root }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to config.toml (sync settings).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Directory holding the shared store and message inboxes for one parent.
    pub fn transport_dir(&self) -> PathBuf {
        self.root.join("transport")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/mv"));
        assert_eq!(storage.config_file(), PathBuf::from("/tmp/mv/config.toml"));
        assert_eq!(storage.transport_dir(), PathBuf::from("/tmp/mv/transport"));
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/mv/logs"));
    }
}
