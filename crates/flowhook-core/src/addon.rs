//! Addon lifecycle contract.
//!
//! The host calls `init`, `hooks` and `services` once at load time (and again
//! only on explicit reload) to populate the hook registry and the scheduler.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;
use crate::flow::HookEventType;
use crate::handler::Handler;
use crate::service::ServiceSpec;

/// Identity and per-instance state of one loaded addon.
///
/// `order` totally orders addons within a phase; ties break on `name`.
#[derive(Debug)]
pub struct AddonDescriptor {
    pub name: String,
    pub order: i32,
    pub version: String,
    enabled: AtomicBool,
}

impl AddonDescriptor {
    pub fn new(name: &str, order: i32, version: &str) -> Self {
        Self {
            name: name.to_string(),
            order,
            version: version.to_string(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Key that orders addons within a phase.
    pub fn sort_key(&self) -> (i32, &str) {
        (self.order, self.name.as_str())
    }
}

/// One hook declared by an addon: a condition string and its handler.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub condition: String,
    pub handler: Handler,
}

impl HookSpec {
    pub fn new(condition: &str, handler: Handler) -> Self {
        Self {
            condition: condition.to_string(),
            handler,
        }
    }
}

/// Hooks an addon contributes, per event type, in registration order.
pub type HookMap = BTreeMap<HookEventType, Vec<HookSpec>>;

/// Key/value configuration collaborator.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Namespaced blob storage collaborator.
pub trait DataStore: Send + Sync {
    fn save_data(&self, namespace: &str, key: &str, value: &Value) -> Result<()>;
    fn get_data(&self, namespace: &str, key: &str) -> Result<Option<Value>>;
}

/// In-memory config and data store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    config: RwLock<HashMap<String, Value>>,
    data: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with per-addon config tables.
    pub fn with_config(config: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            config: RwLock::new(config.into_iter().collect()),
            data: RwLock::default(),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.config.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.config.write().insert(key.to_string(), value);
        Ok(())
    }
}

impl DataStore for MemoryStore {
    fn save_data(&self, namespace: &str, key: &str, value: &Value) -> Result<()> {
        self.data
            .write()
            .insert((namespace.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    fn get_data(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .data
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }
}

/// What an addon sees during `init`: its config snapshot plus persistence.
pub struct AddonContext {
    name: String,
    config: Value,
    config_store: Arc<dyn ConfigStore>,
    data_store: Arc<dyn DataStore>,
}

impl AddonContext {
    pub fn new(
        name: &str,
        config_store: Arc<dyn ConfigStore>,
        data_store: Arc<dyn DataStore>,
    ) -> Self {
        let config = config_store.get(name).unwrap_or(Value::Null);
        Self {
            name: name.to_string(),
            config,
            config_store,
            data_store,
        }
    }

    /// Context backed by a fresh [`MemoryStore`].
    pub fn detached(name: &str) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(name, store.clone(), store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration snapshot taken when the context was created.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Merge `patch` into the addon's config and persist it.
    pub fn update_config(&mut self, patch: Value) -> Result<()> {
        match (&mut self.config, patch) {
            (Value::Object(current), Value::Object(patch)) => {
                for (k, v) in patch {
                    current.insert(k, v);
                }
            }
            (current, patch) => *current = patch,
        }
        self.config_store.set(&self.name, self.config.clone())
    }

    pub fn save_data(&self, key: &str, value: &Value) -> Result<()> {
        self.data_store.save_data(&self.name, key, value)
    }

    pub fn get_data(&self, key: &str) -> Result<Option<Value>> {
        self.data_store.get_data(&self.name, key)
    }
}

/// Contract every addon implements.
///
/// Per-instance state lives behind interior mutability on the implementing
/// type; nothing is shared between instances.
pub trait Addon: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> i32 {
        0
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Receive the configuration snapshot; may persist defaults.
    fn init(&self, ctx: &mut AddonContext) -> Result<()>;

    /// Running indicator shown on the host status page.
    fn state(&self) -> bool;

    /// Hooks to register, per event type.
    fn hooks(self: Arc<Self>) -> HookMap;

    /// Jobs to hand to the scheduler.
    fn services(self: Arc<Self>) -> Vec<ServiceSpec> {
        Vec::new()
    }
}
