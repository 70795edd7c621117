//! Flowhook configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowhookError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowhookConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Free-form per-addon tables, keyed by addon name.
    #[serde(default)]
    pub addons: BTreeMap<String, toml::Table>,
}

impl FlowhookConfig {
    /// Load config from the default path (~/.flowhook/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowhookError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FlowhookError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlowhookError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Flowhook home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowhook")
    }

    /// An addon's table as JSON, or `Null` when absent.
    pub fn addon_config(&self, name: &str) -> serde_json::Value {
        self.addons
            .get(name)
            .and_then(|table| serde_json::to_value(table).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    /// Replace an addon's table. Only JSON objects are accepted.
    pub fn set_addon_config(&mut self, name: &str, value: &serde_json::Value) -> Result<()> {
        let converted = toml::Value::try_from(value).map_err(|e| {
            FlowhookError::Config(format!("Addon '{name}' config is not TOML-compatible: {e}"))
        })?;
        match converted {
            toml::Value::Table(table) => {
                self.addons.insert(name.to_string(), table);
                Ok(())
            }
            other => Err(FlowhookError::Config(format!(
                "Addon '{name}' config must be a table, got {}",
                other.type_str()
            ))),
        }
    }

    /// The `enabled` key of an addon's table, if set.
    pub fn addon_enabled(&self, name: &str) -> Option<bool> {
        self.addons
            .get(name)
            .and_then(|t| t.get("enabled"))
            .and_then(toml::Value::as_bool)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long shutdown waits for in-flight dispatches.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    /// Upper bound for a single async handler (0 = unbounded).
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

fn default_drain_timeout() -> u64 { 5 }
fn default_handler_timeout() -> u64 { 30 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

impl DispatchConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_secs > 0).then(|| Duration::from_secs(self.handler_timeout_secs))
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 { 1000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Addon data store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String { "~/.flowhook/data".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StoreConfig {
    /// `data_dir` with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlowhookConfig::default();
        assert_eq!(config.dispatch.drain_timeout_secs, 5);
        assert_eq!(config.dispatch.handler_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.scheduler.tick_interval(), Duration::from_millis(1000));
        assert!(config.addons.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [dispatch]
            drain_timeout_secs = 2
            handler_timeout_secs = 0

            [addons.demo]
            enabled = false
            domain = "misskey-hub.net"
        "#;

        let config: FlowhookConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dispatch.drain_timeout(), Duration::from_secs(2));
        assert_eq!(config.dispatch.handler_timeout(), None);
        assert_eq!(config.addon_enabled("demo"), Some(false));
        assert_eq!(config.addon_config("demo")["domain"], "misskey-hub.net");
        assert!(config.addon_config("missing").is_null());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: FlowhookConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.store.data_dir, "~/.flowhook/data");
    }

    #[test]
    fn test_save_and_reload_addon_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = FlowhookConfig::default();
        config
            .set_addon_config("demo", &serde_json::json!({"enabled": true, "limit": 3}))
            .unwrap();
        config.save_to(&path).unwrap();

        let loaded = FlowhookConfig::load_from(&path).unwrap();
        assert_eq!(loaded.addon_enabled("demo"), Some(true));
        assert_eq!(loaded.addon_config("demo")["limit"], 3);
    }

    #[test]
    fn test_non_object_addon_config_rejected() {
        let mut config = FlowhookConfig::default();
        assert!(config.set_addon_config("demo", &serde_json::json!(42)).is_err());
    }

    #[test]
    fn test_home_dir() {
        let home = FlowhookConfig::home_dir();
        assert!(home.to_string_lossy().contains("flowhook"));
    }
}
