//! Addon host — loads addons and wires them into the dispatcher and the
//! scheduler.
//!
//! Loading an addon runs `init` with its config snapshot, registers its
//! hooks and hands its services to the scheduler. Rejected rules and
//! invalid triggers are logged and left out; the rest of the addon loads.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flowhook_core::{
    Addon, AddonContext, AddonDescriptor, ConfigStore, DataStore, FlowView, FlowhookConfig,
    FlowhookError, HookEventType, MemoryStore, Result,
};
use flowhook_hooks::{DispatchReport, Dispatcher, HookRegistry};
use flowhook_scheduler::ServiceScheduler;

use crate::store::{FileDataStore, TomlConfigStore};

/// One row of the host status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddonStatus {
    pub name: String,
    pub version: String,
    pub order: i32,
    pub enabled: bool,
    /// The addon's own running indicator.
    pub running: bool,
    pub hooks: usize,
    pub jobs: usize,
}

struct LoadedAddon {
    addon: Arc<dyn Addon>,
    descriptor: Arc<AddonDescriptor>,
}

/// Owns the loaded addons and the engine components they feed.
pub struct AddonHost {
    config: FlowhookConfig,
    config_store: Arc<dyn ConfigStore>,
    data_store: Arc<dyn DataStore>,
    registry: Arc<HookRegistry>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<ServiceScheduler>,
    addons: RwLock<BTreeMap<String, LoadedAddon>>,
    /// Names reserved by a `load` that has not finished yet.
    loading: Mutex<HashSet<String>>,
}

impl AddonHost {
    pub fn new(
        config: FlowhookConfig,
        config_store: Arc<dyn ConfigStore>,
        data_store: Arc<dyn DataStore>,
    ) -> Self {
        let registry = Arc::new(HookRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), config.dispatch.clone()));
        Self {
            config,
            config_store,
            data_store,
            registry,
            dispatcher,
            scheduler: Arc::new(ServiceScheduler::new()),
            addons: RwLock::new(BTreeMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    /// Host persisting addon config to `config_path` (if any) and addon data
    /// under the configured `data_dir`.
    pub fn from_config(config: FlowhookConfig, config_path: Option<PathBuf>) -> Self {
        let data_store = Arc::new(FileDataStore::new(&config.store.data_dir()));
        let config_store = Arc::new(TomlConfigStore::new(config.clone(), config_path));
        Self::new(config, config_store, data_store)
    }

    /// Host whose addon config and data live only in memory.
    pub fn in_memory(config: FlowhookConfig) -> Self {
        let store = Arc::new(MemoryStore::with_config(config.addons.iter().filter_map(
            |(name, table)| serde_json::to_value(table).ok().map(|value| (name.clone(), value)),
        )));
        Self::new(config, store.clone(), store)
    }

    pub fn config(&self) -> &FlowhookConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<ServiceScheduler> {
        &self.scheduler
    }

    /// Load an addon: init, hooks, services.
    pub fn load(&self, addon: Arc<dyn Addon>) -> Result<AddonStatus> {
        let name = addon.name().to_string();
        {
            let addons = self.addons.write();
            if addons.contains_key(&name) || !self.loading.lock().insert(name.clone()) {
                return Err(FlowhookError::Addon(format!("'{name}' is already loaded")));
            }
        }

        let descriptor = Arc::new(AddonDescriptor::new(&name, addon.order(), addon.version()));
        if let Err(e) = self.activate(&addon, &descriptor) {
            self.loading.lock().remove(&name);
            return Err(e);
        }
        {
            let mut addons = self.addons.write();
            addons.insert(
                name.clone(),
                LoadedAddon {
                    addon,
                    descriptor,
                },
            );
            self.loading.lock().remove(&name);
        }

        let status = self
            .addon_status(&name)
            .ok_or_else(|| FlowhookError::Addon(format!("'{name}' vanished during load")))?;
        tracing::info!(
            addon = %name,
            version = %status.version,
            hooks = status.hooks,
            jobs = status.jobs,
            "🧩 Addon loaded"
        );
        Ok(status)
    }

    /// Run `init`, then swap in the addon's hooks and services. Hooks and
    /// jobs it registered before stay live until their replacements are in.
    fn activate(&self, addon: &Arc<dyn Addon>, descriptor: &Arc<AddonDescriptor>) -> Result<()> {
        let name = descriptor.name.as_str();
        let mut ctx = AddonContext::new(name, self.config_store.clone(), self.data_store.clone());
        addon
            .init(&mut ctx)
            .map_err(|e| FlowhookError::Addon(format!("'{name}' init failed: {e}")))?;
        if let Some(enabled) = ctx.config_value("enabled").and_then(Value::as_bool) {
            descriptor.set_enabled(enabled);
        }

        self.registry.replace_addon(descriptor, addon.clone().hooks());
        let mut scheduled = HashSet::new();
        for spec in addon.clone().services() {
            let id = spec.id.clone();
            match self.scheduler.register(Some(descriptor.clone()), spec) {
                Ok(key) => {
                    scheduled.insert(key);
                }
                Err(e) => tracing::warn!(addon = name, job = %id, "Service not scheduled: {e}"),
            }
        }
        self.scheduler.retain_addon_jobs(name, &scheduled);
        Ok(())
    }

    fn deactivate(&self, name: &str) {
        self.registry.unregister(name);
        self.scheduler.unregister_addon(name);
    }

    /// Unload an addon, removing its hooks and jobs.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.addons.write().remove(name).is_some();
        if removed {
            self.deactivate(name);
            tracing::info!(addon = name, "Addon unloaded");
        }
        removed
    }

    /// Re-run `init` and swap in the addon's current hooks and jobs. If
    /// `init` fails the previous hooks and jobs stay registered.
    pub fn reload(&self, name: &str) -> Result<()> {
        let (addon, descriptor) = {
            let addons = self.addons.read();
            let loaded = addons
                .get(name)
                .ok_or_else(|| FlowhookError::Addon(format!("'{name}' is not loaded")))?;
            (loaded.addon.clone(), loaded.descriptor.clone())
        };
        self.activate(&addon, &descriptor)?;
        tracing::info!(addon = name, "🔄 Addon reloaded");
        Ok(())
    }

    /// Toggle an addon and persist the flag in its config.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let descriptor = self
            .addons
            .read()
            .get(name)
            .map(|loaded| loaded.descriptor.clone())
            .ok_or_else(|| FlowhookError::Addon(format!("'{name}' is not loaded")))?;
        descriptor.set_enabled(enabled);

        let mut config = match self.config_store.get(name) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        config.insert("enabled".into(), Value::Bool(enabled));
        self.config_store.set(name, Value::Object(config))?;
        tracing::info!(addon = name, enabled, "Addon toggled");
        Ok(())
    }

    pub fn addon_status(&self, name: &str) -> Option<AddonStatus> {
        let addons = self.addons.read();
        addons.get(name).map(|loaded| self.status_of(loaded))
    }

    /// Status of every loaded addon, in dispatch order.
    pub fn status(&self) -> Vec<AddonStatus> {
        let addons = self.addons.read();
        let mut rows: Vec<AddonStatus> = addons.values().map(|l| self.status_of(l)).collect();
        rows.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));
        rows
    }

    fn status_of(&self, loaded: &LoadedAddon) -> AddonStatus {
        let d = &loaded.descriptor;
        AddonStatus {
            name: d.name.clone(),
            version: d.version.clone(),
            order: d.order,
            enabled: d.is_enabled(),
            running: loaded.addon.state(),
            hooks: self.registry.count_for(&d.name),
            jobs: self.scheduler.count_for(&d.name),
        }
    }

    pub fn len(&self) -> usize {
        self.addons.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the handler chain of `event` for one flow.
    pub async fn dispatch(&self, event: HookEventType, flow: &mut FlowView) -> Result<DispatchReport> {
        self.dispatcher.dispatch(event, flow).await
    }

    /// Start the scheduler loop at the configured tick interval.
    pub fn start_scheduler(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.scheduler
            .clone()
            .spawn(self.config.scheduler.tick_interval(), cancel)
    }

    /// Drain the dispatcher. Returns whether every in-flight flow finished.
    pub async fn shutdown(&self) -> bool {
        self.dispatcher.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowhook_core::{Handler, HookMap, HookSpec, JobFunc, ServiceSpec, TriggerSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Tagger {
        name: &'static str,
        order: i32,
        inits: AtomicUsize,
        running: AtomicBool,
    }

    impl Tagger {
        fn new(name: &'static str, order: i32) -> Arc<Self> {
            Arc::new(Self {
                name,
                order,
                inits: AtomicUsize::new(0),
                running: AtomicBool::new(false),
            })
        }
    }

    impl Addon for Tagger {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn init(&self, ctx: &mut AddonContext) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if ctx.config().is_null() {
                ctx.update_config(json!({"enabled": true}))?;
            }
            ctx.save_data("data", &json!({"loaded": true}))?;
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn state(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn hooks(self: Arc<Self>) -> HookMap {
            let tag = self.name;
            let mut hooks = HookMap::new();
            hooks.insert(
                HookEventType::Request,
                vec![
                    HookSpec::new(
                        "DOMAIN-SUFFIX,example.com",
                        Handler::sync(move |flow| {
                            flow.headers.append("x-tag", tag);
                            Ok(())
                        }),
                    ),
                    HookSpec::new("NOT-A-RULE,x", Handler::sync(|_| Ok(()))),
                ],
            );
            hooks
        }

        fn services(self: Arc<Self>) -> Vec<ServiceSpec> {
            vec![
                ServiceSpec::new(
                    "tick",
                    "Tick",
                    TriggerSpec::interval(60),
                    JobFunc::sync(|_| Ok(())),
                ),
                ServiceSpec::new(
                    "broken",
                    "Broken",
                    TriggerSpec::cron("not a cron"),
                    JobFunc::sync(|_| Ok(())),
                ),
            ]
        }
    }

    fn host() -> AddonHost {
        AddonHost::in_memory(FlowhookConfig::default())
    }

    fn tags(flow: &FlowView) -> Vec<String> {
        flow.headers.get_all("x-tag").map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_load_registers_hooks_and_jobs() {
        let host = host();
        let status = host.load(Tagger::new("demo", 1)).unwrap();
        assert_eq!(status.hooks, 1);
        assert_eq!(status.jobs, 1);
        assert!(status.enabled);
        assert!(status.running);
        assert_eq!(host.registry().rejected().len(), 1);

        let mut flow = FlowView::new("api.example.com", "GET", "/");
        let report = host.dispatch(HookEventType::Request, &mut flow).await.unwrap();
        assert_eq!(report.invoked, 1);
        assert_eq!(tags(&flow), vec!["demo"]);
    }

    #[tokio::test]
    async fn test_addons_dispatch_in_order() {
        let host = host();
        host.load(Tagger::new("second", 2)).unwrap();
        host.load(Tagger::new("first", 1)).unwrap();

        let mut flow = FlowView::new("example.com", "GET", "/");
        host.dispatch(HookEventType::Request, &mut flow).await.unwrap();
        assert_eq!(tags(&flow), vec!["first", "second"]);
        let names: Vec<String> = host.status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_disabled_addon_skipped_and_flag_persisted() {
        let host = host();
        host.load(Tagger::new("demo", 1)).unwrap();
        host.set_enabled("demo", false).unwrap();

        let mut flow = FlowView::new("example.com", "GET", "/");
        let report = host.dispatch(HookEventType::Request, &mut flow).await.unwrap();
        assert_eq!(report.skipped_disabled, 1);
        assert!(tags(&flow).is_empty());
        assert!(!host.addon_status("demo").unwrap().enabled);

        // The persisted flag survives a reload.
        host.reload("demo").unwrap();
        assert!(!host.addon_status("demo").unwrap().enabled);
    }

    #[test]
    fn test_config_disables_addon_at_load() {
        let mut config = FlowhookConfig::default();
        config
            .set_addon_config("demo", &json!({"enabled": false}))
            .unwrap();
        let host = AddonHost::in_memory(config);
        let status = host.load(Tagger::new("demo", 1)).unwrap();
        assert!(!status.enabled);
    }

    #[test]
    fn test_reload_reruns_init_without_duplicates() {
        let host = host();
        let addon = Tagger::new("demo", 1);
        host.load(addon.clone()).unwrap();
        host.reload("demo").unwrap();

        assert_eq!(addon.inits.load(Ordering::SeqCst), 2);
        let status = host.addon_status("demo").unwrap();
        assert_eq!(status.hooks, 1);
        assert_eq!(status.jobs, 1);
        assert!(host.reload("missing").is_err());
    }

    #[test]
    fn test_duplicate_load_and_unload() {
        let host = host();
        host.load(Tagger::new("demo", 1)).unwrap();
        assert!(host.load(Tagger::new("demo", 1)).is_err());

        assert!(host.unload("demo"));
        assert!(!host.unload("demo"));
        assert!(host.is_empty());
        assert!(host.registry().is_empty());
        assert!(host.scheduler().is_empty());
    }

    #[test]
    fn test_file_backed_host_persists_config_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FlowhookConfig::default();
        config.store.data_dir = dir.path().join("data").to_string_lossy().into_owned();
        let config_path = dir.path().join("config.toml");

        let host = AddonHost::from_config(config, Some(config_path.clone()));
        host.load(Tagger::new("demo", 1)).unwrap();

        let saved = FlowhookConfig::load_from(&config_path).unwrap();
        assert_eq!(saved.addon_enabled("demo"), Some(true));
        assert!(dir.path().join("data").join("demo").join("data.json").exists());
    }

    /// Records how many request bindings dispatch could see while `init` ran.
    struct Watcher {
        registry: Arc<HookRegistry>,
        seen: Mutex<Vec<usize>>,
        fail_init: AtomicBool,
    }

    impl Addon for Watcher {
        fn name(&self) -> &str {
            "watcher"
        }

        fn init(&self, _ctx: &mut AddonContext) -> Result<()> {
            self.seen.lock().push(self.registry.bindings(HookEventType::Request).len());
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(FlowhookError::other("init refused"));
            }
            Ok(())
        }

        fn state(&self) -> bool {
            true
        }

        fn hooks(self: Arc<Self>) -> HookMap {
            let mut hooks = HookMap::new();
            hooks.insert(
                HookEventType::Request,
                vec![HookSpec::new("DOMAIN,example.com", Handler::sync(|_| Ok(())))],
            );
            hooks
        }
    }

    #[test]
    fn test_reload_keeps_hooks_visible_throughout() {
        let host = host();
        let watcher = Arc::new(Watcher {
            registry: host.registry().clone(),
            seen: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
        });
        host.load(watcher.clone()).unwrap();
        host.reload("watcher").unwrap();
        assert_eq!(*watcher.seen.lock(), vec![0, 1]);
        assert_eq!(host.registry().bindings(HookEventType::Request).len(), 1);

        watcher.fail_init.store(true, Ordering::SeqCst);
        assert!(host.reload("watcher").is_err());
        assert_eq!(host.addon_status("watcher").unwrap().hooks, 1);
    }

    #[test]
    fn test_concurrent_loads_of_one_name_register_once() {
        for _ in 0..50 {
            let host = host();
            let barrier = std::sync::Barrier::new(2);
            let loaded: Vec<bool> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            host.load(Tagger::new("demo", 1)).is_ok()
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            assert_eq!(loaded.iter().filter(|ok| **ok).count(), 1);
            assert_eq!(host.len(), 1);
            assert_eq!(host.registry().count_for("demo"), 1);
            assert_eq!(host.scheduler().count_for("demo"), 1);
        }
    }

    #[test]
    fn test_failed_load_releases_name() {
        let host = host();
        let watcher = Arc::new(Watcher {
            registry: host.registry().clone(),
            seen: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(true),
        });
        assert!(host.load(watcher.clone()).is_err());
        assert!(host.registry().is_empty());

        watcher.fail_init.store(false, Ordering::SeqCst);
        assert!(host.load(watcher).is_ok());
    }
}
