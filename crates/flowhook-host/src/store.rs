//! File-backed persistence for addons.
//! Data blobs are saved as JSON files under `data_dir/<addon>/<key>.json`,
//! human-readable and only touched when an addon saves or loads.
//! Addon config lives in the `[addons.<name>]` tables of config.toml.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;

use flowhook_core::{ConfigStore, DataStore, FlowhookConfig, FlowhookError, Result};

/// File-based addon data store.
pub struct FileDataStore {
    root: PathBuf,
}

impl FileDataStore {
    /// Create a store rooted at `dir`. Directories are created on first save.
    pub fn new(dir: &Path) -> Self {
        Self {
            root: dir.to_path_buf(),
        }
    }

    /// Default store path (~/.flowhook/data).
    pub fn default_path() -> PathBuf {
        FlowhookConfig::home_dir().join("data")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        for part in [namespace, key] {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(['/', '\\'])
            {
                return Err(FlowhookError::Store(format!("invalid data key '{part}'")));
            }
        }
        Ok(self.root.join(namespace).join(format!("{key}.json")))
    }
}

impl DataStore for FileDataStore {
    fn save_data(&self, namespace: &str, key: &str, value: &Value) -> Result<()> {
        let file = self.file(namespace, key)?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&file, json)?;
        tracing::debug!("💾 Saved {namespace}/{key} to {}", file.display());
        Ok(())
    }

    fn get_data(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let file = self.file(namespace, key)?;
        if !file.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&file)?;
        let value = serde_json::from_str(&json).map_err(|e| {
            FlowhookError::Store(format!("Failed to parse {}: {e}", file.display()))
        })?;
        Ok(Some(value))
    }
}

/// Addon config backed by [`FlowhookConfig`]. Every `set` is written back
/// to `path` when one is given.
pub struct TomlConfigStore {
    config: RwLock<FlowhookConfig>,
    path: Option<PathBuf>,
}

impl TomlConfigStore {
    pub fn new(config: FlowhookConfig, path: Option<PathBuf>) -> Self {
        Self {
            config: RwLock::new(config),
            path,
        }
    }

    /// Current config snapshot.
    pub fn snapshot(&self) -> FlowhookConfig {
        self.config.read().clone()
    }
}

impl ConfigStore for TomlConfigStore {
    fn get(&self, key: &str) -> Option<Value> {
        let value = self.config.read().addon_config(key);
        (!value.is_null()).then_some(value)
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut config = self.config.write();
        config.set_addon_config(key, &value)?;
        if let Some(path) = &self.path {
            config.save_to(path)?;
            tracing::debug!(addon = key, "Config saved to {}", path.display());
        }
        Ok(())
    }
}
