//! Replay recorded flows through the addon host.
//!
//! Input is a JSON array of flow records. Every flow runs on its own task;
//! within a flow the request phase completes before the response phase.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use flowhook_core::{FlowView, HookEventType};
use flowhook_hooks::DispatchReport;
use flowhook_host::AddonHost;

/// One recorded flow.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowRecord {
    pub host: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

fn default_method() -> String { "GET".into() }
fn default_path() -> String { "/".into() }

impl FlowRecord {
    fn into_flow(self) -> FlowView {
        let mut flow = FlowView::new(&self.host, &self.method, &self.path).with_body(self.body);
        if let Some(port) = self.port {
            flow = flow.with_port(port);
        }
        for (name, value) in &self.headers {
            flow.headers.append(name, value.as_str());
        }
        flow
    }
}

/// Totals across every replayed flow and phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub flows: usize,
    pub matched: usize,
    pub invoked: usize,
    pub failed: usize,
    pub skipped_disabled: usize,
    pub cancelled: usize,
    /// Dispatches refused outright (e.g. during shutdown).
    pub refused: usize,
}

impl ReplaySummary {
    fn add(&mut self, report: &DispatchReport) {
        self.matched += report.matched;
        self.invoked += report.invoked;
        self.failed += report.failed;
        self.skipped_disabled += report.skipped_disabled;
        self.cancelled += usize::from(report.cancelled);
    }
}

pub fn load_flows(path: &Path) -> Result<Vec<FlowRecord>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Dispatch both phases of every record. Returns the mutated flows in input
/// order along with the totals.
pub async fn replay(host: Arc<AddonHost>, records: Vec<FlowRecord>) -> (Vec<FlowView>, ReplaySummary) {
    let mut tasks = JoinSet::new();
    for (index, record) in records.into_iter().enumerate() {
        let host = host.clone();
        tasks.spawn(async move {
            let mut flow = record.into_flow();
            let mut reports = Vec::with_capacity(2);
            for event in HookEventType::ALL {
                match host.dispatch(event, &mut flow).await {
                    Ok(report) => reports.push(Ok(report)),
                    Err(e) => {
                        tracing::warn!(host = %flow.host, event = %event, "Dispatch refused: {e}");
                        reports.push(Err(e));
                        break;
                    }
                }
            }
            (index, flow, reports)
        });
    }

    let mut summary = ReplaySummary::default();
    let mut flows = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, flow, reports) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("Replay task failed: {e}");
                continue;
            }
        };
        summary.flows += 1;
        for report in &reports {
            match report {
                Ok(report) => summary.add(report),
                Err(_) => summary.refused += 1,
            }
        }
        flows.push((index, flow));
    }

    flows.sort_by_key(|(index, _)| *index);
    (flows.into_iter().map(|(_, flow)| flow).collect(), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::TestAddon;
    use flowhook_core::FlowhookConfig;

    fn records(json: &str) -> Vec<FlowRecord> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_record_defaults() {
        let parsed = records(r#"[{"host": "misskey-hub.net"}]"#);
        let flow = parsed[0].clone().into_flow();
        assert_eq!(flow.method, "GET");
        assert_eq!(flow.path, "/");
        assert_eq!(flow.port, 443);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_runs_both_phases_per_flow() {
        let host = Arc::new(AddonHost::in_memory(FlowhookConfig::default()));
        host.load(TestAddon::new()).unwrap();

        let input = records(
            r#"[
                {"host": "misskey-hub.net", "path": "/notes"},
                {"host": "example.com", "headers": [["Accept", "*/*"]]},
                {"host": "media.misskey-hub.net", "method": "POST", "port": 8443, "body": "hi"}
            ]"#,
        );
        let (flows, summary) = replay(host, input).await;

        assert_eq!(summary.flows, 3);
        assert_eq!(summary.matched, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(flows[0].headers.get("x-flowhook-seen"), Some("1"));
        assert!(!flows[1].headers.contains("x-flowhook-seen"));
        assert_eq!(flows[1].headers.get("accept"), Some("*/*"));
        assert_eq!(flows[2].headers.get("x-flowhook-kind"), Some("media"));
        assert_eq!(flows[2].port, 8443);
    }

    #[tokio::test]
    async fn test_replay_after_shutdown_counts_refusals() {
        let host = Arc::new(AddonHost::in_memory(FlowhookConfig::default()));
        host.shutdown().await;
        let (_, summary) = replay(host, records(r#"[{"host": "a.com"}]"#)).await;
        assert_eq!(summary.refused, 1);
        assert_eq!(summary.invoked, 0);
    }
}
