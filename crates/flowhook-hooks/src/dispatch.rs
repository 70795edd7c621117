//! Dispatcher — runs the matching handlers of one flow phase, in order.
//!
//! Each handler is allowed to complete (or yield and resume) before the next
//! binding is considered. Handler failures and panics are contained per
//! binding. Shutdown stops new dispatches, drains in-flight ones for a
//! bounded time, then abandons whatever async work is left.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use flowhook_core::config::DispatchConfig;
use flowhook_core::error::panic_reason;
use flowhook_core::{FlowView, FlowhookError, HandlerCall, HookEventType, Result};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::registry::{HookBinding, HookRegistry};

/// What happened during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Bindings whose rule matched.
    pub matched: usize,
    /// Handlers invoked (including failed ones).
    pub invoked: usize,
    /// Handlers that returned an error, panicked or timed out.
    pub failed: usize,
    /// Bindings skipped because their addon is disabled.
    pub skipped_disabled: usize,
    /// The chain was cut short by hard cancellation.
    pub cancelled: bool,
}

enum Invocation {
    Completed,
    Failed(String),
    Abandoned,
}

/// Dispatches flow events to registered hooks.
pub struct Dispatcher {
    registry: Arc<HookRegistry>,
    config: DispatchConfig,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    hard_cancel: CancellationToken,
}

struct InFlight<'a>(&'a Dispatcher);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<HookRegistry>, config: DispatchConfig) -> Self {
        Self {
            registry,
            config,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            hard_cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Dispatches currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run the hooks registered for `event` against `flow`.
    ///
    /// Returns `Err(ShuttingDown)` once shutdown has begun; handler failures
    /// never surface here, only in the report and the log.
    pub async fn dispatch(&self, event: HookEventType, flow: &mut FlowView) -> Result<DispatchReport> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self);
        if !self.is_accepting() {
            return Err(FlowhookError::ShuttingDown);
        }

        flow.phase = event;
        let bindings = self.registry.bindings(event);
        let mut report = DispatchReport::default();

        for binding in bindings.iter() {
            if self.hard_cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if !binding.addon.is_enabled() {
                report.skipped_disabled += 1;
                continue;
            }
            if !binding.rule.evaluate(flow) {
                continue;
            }

            report.matched += 1;
            report.invoked += 1;
            match self.invoke(binding, flow).await {
                Invocation::Completed => {}
                Invocation::Failed(reason) => {
                    report.failed += 1;
                    let err = FlowhookError::HandlerExecution {
                        addon: binding.addon.name.clone(),
                        event,
                        reason,
                    };
                    tracing::error!(rule = binding.rule.source(), host = %flow.host, "{err}");
                }
                Invocation::Abandoned => {
                    report.cancelled = true;
                    tracing::warn!(
                        addon = %binding.addon.name,
                        event = %event,
                        host = %flow.host,
                        "Handler abandoned by hard cancellation"
                    );
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn invoke(&self, binding: &HookBinding, flow: &mut FlowView) -> Invocation {
        let handler = &binding.handler;
        let work = AssertUnwindSafe(async move {
            match handler.call(flow) {
                HandlerCall::Ready(result) => result,
                HandlerCall::Pending(pending) => pending.await,
            }
        })
        .catch_unwind();

        let limit = self.config.handler_timeout();
        let bounded = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, work).await.ok(),
                None => Some(work.await),
            }
        };

        tokio::select! {
            biased;
            outcome = bounded => match outcome {
                Some(Ok(Ok(()))) => Invocation::Completed,
                Some(Ok(Err(e))) => Invocation::Failed(e.to_string()),
                Some(Err(panic)) => Invocation::Failed(panic_reason(panic.as_ref())),
                None => Invocation::Failed(format!(
                    "timed out after {}s",
                    limit.map(|d| d.as_secs()).unwrap_or_default()
                )),
            },
            _ = self.hard_cancel.cancelled() => Invocation::Abandoned,
        }
    }

    /// Stop accepting flows and drain in-flight dispatches.
    ///
    /// Waits up to the configured drain timeout. Anything still running then
    /// is abandoned: pending async handlers are dropped and their dispatches
    /// return with `cancelled` set. Returns whether the drain completed.
    pub async fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        let timeout = self.config.drain_timeout();
        tracing::info!(in_flight = self.in_flight(), "Dispatcher draining ({}s)", timeout.as_secs());

        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();
        if !drained {
            tracing::warn!(
                in_flight = self.in_flight(),
                "Drain timed out, abandoning remaining handler work"
            );
            self.hard_cancel.cancel();
        }
        drained
    }

    /// Hard cancellation: refuse new flows and cut every running chain at
    /// its next await point.
    pub fn cancel_now(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.hard_cancel.cancel();
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
