//! Bundled example addon.
//!
//! Watches traffic to misskey-hub.net: the request hook tags the flow with a
//! cached classification of its host, the response hook marks it seen after
//! an await point, and a heartbeat job reports the counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::json;

use flowhook_cache::Cached;
use flowhook_core::{
    Addon, AddonContext, FlowView, Handler, HookEventType, HookMap, HookSpec, JobFunc, Result,
    ServiceSpec, TriggerSpec,
};

pub const NAME: &str = "test-addon";
const CONDITION: &str = "DOMAIN-SUFFIX,misskey-hub.net";

pub struct TestAddon {
    enabled: AtomicBool,
    requests: AtomicU64,
    responses: AtomicU64,
    classify: Cached<String, String>,
}

impl TestAddon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            classify: Cached::wrap("classify_host", 128, Duration::from_secs(3600), |host: &String| {
                Ok(classify_host(host))
            }),
        })
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    fn on_request(&self, flow: &mut FlowView) -> Result<()> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let kind = self.classify.call(&flow.normalized_host().to_ascii_lowercase())?;
        tracing::info!(addon = NAME, kind = %kind, "{} {}", flow.method, flow.host);
        flow.headers.set("x-flowhook-kind", kind);
        Ok(())
    }

    async fn on_response(&self, flow: &mut FlowView) -> Result<()> {
        tokio::task::yield_now().await;
        self.responses.fetch_add(1, Ordering::Relaxed);
        tracing::info!(addon = NAME, "{} async", flow.host);
        flow.headers.set("x-flowhook-seen", "1");
        Ok(())
    }
}

/// Rough role of a misskey-hub.net host, derived from its first label.
fn classify_host(host: &str) -> String {
    match host.split('.').next().unwrap_or_default() {
        "misskey-hub" | "www" => "site",
        "media" | "s3" | "cdn" => "media",
        "api" => "api",
        _ => "other",
    }
    .to_string()
}

impl Addon for TestAddon {
    fn name(&self) -> &str {
        NAME
    }

    fn order(&self) -> i32 {
        1
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn init(&self, ctx: &mut AddonContext) -> Result<()> {
        tracing::info!("init {NAME} ...");
        if let Some(enabled) = ctx.config_value("enabled").and_then(|v| v.as_bool()) {
            self.enabled.store(enabled, Ordering::Relaxed);
        }
        ctx.update_config(json!({ "enabled": self.enabled.load(Ordering::Relaxed) }))?;
        ctx.save_data("data", &json!({ "1": 1, "2": 2 }))?;
        Ok(())
    }

    fn state(&self) -> bool {
        true
    }

    fn hooks(self: Arc<Self>) -> HookMap {
        let on_request = self.clone();
        let on_response = self;

        let mut hooks = HookMap::new();
        hooks.insert(
            HookEventType::Request,
            vec![HookSpec::new(
                CONDITION,
                Handler::sync(move |flow| on_request.on_request(flow)),
            )],
        );
        hooks.insert(
            HookEventType::Response,
            vec![HookSpec::new(
                CONDITION,
                Handler::asynchronous(move |flow| {
                    let addon = on_response.clone();
                    Box::pin(async move { addon.on_response(flow).await })
                }),
            )],
        );
        hooks
    }

    fn services(self: Arc<Self>) -> Vec<ServiceSpec> {
        let addon = self;
        vec![
            ServiceSpec::new(
                "heartbeat",
                "Heartbeat",
                TriggerSpec::interval(30),
                JobFunc::sync(move |kwargs| {
                    tracing::info!(
                        addon = NAME,
                        watched = %kwargs.get("target").and_then(|v| v.as_str()).unwrap_or("-"),
                        requests = addon.requests(),
                        responses = addon.responses(),
                        cache_hits = addon.classify.stats().hits,
                        "💓 heartbeat"
                    );
                    Ok(())
                }),
            )
            .with_kwarg("target", "misskey-hub.net"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowhook_core::FlowhookConfig;
    use flowhook_host::AddonHost;

    #[tokio::test]
    async fn test_demo_addon_hooks_matching_flows() {
        let host = AddonHost::in_memory(FlowhookConfig::default());
        let addon = TestAddon::new();
        let status = host.load(addon.clone()).unwrap();
        assert_eq!(status.hooks, 2);
        assert_eq!(status.jobs, 1);
        assert_eq!(status.order, 1);

        let mut flow = FlowView::new("media.misskey-hub.net", "GET", "/img.png");
        host.dispatch(HookEventType::Request, &mut flow).await.unwrap();
        host.dispatch(HookEventType::Response, &mut flow).await.unwrap();
        assert_eq!(flow.headers.get("x-flowhook-kind"), Some("media"));
        assert_eq!(flow.headers.get("x-flowhook-seen"), Some("1"));

        let mut other = FlowView::new("example.com", "GET", "/");
        host.dispatch(HookEventType::Request, &mut other).await.unwrap();
        assert!(!other.headers.contains("x-flowhook-kind"));
        assert_eq!((addon.requests(), addon.responses()), (1, 1));
    }

    #[tokio::test]
    async fn test_classification_is_cached() {
        let host = AddonHost::in_memory(FlowhookConfig::default());
        let addon = TestAddon::new();
        host.load(addon.clone()).unwrap();
        for _ in 0..3 {
            let mut flow = FlowView::new("misskey-hub.net", "GET", "/");
            host.dispatch(HookEventType::Request, &mut flow).await.unwrap();
        }
        let stats = addon.classify.stats();
        assert_eq!((stats.misses, stats.hits), (1, 2));
    }

    #[test]
    fn test_init_keeps_configured_flag() {
        let mut config = FlowhookConfig::default();
        config.set_addon_config(NAME, &json!({"enabled": false})).unwrap();
        let host = AddonHost::in_memory(config);
        let addon = TestAddon::new();
        let status = host.load(addon.clone()).unwrap();
        assert!(!status.enabled);
        assert!(!addon.enabled.load(Ordering::Relaxed));
    }
}
