//! Handler abstraction — one callable shape for sync and async hook handlers.
//!
//! A handler either completes immediately ([`HandlerCall::Ready`]) or hands the
//! dispatcher a pending unit of work ([`HandlerCall::Pending`]) that borrows the
//! flow until it resolves. The dispatcher awaits it before the next binding of
//! the same flow runs, while other flows keep making progress.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::flow::FlowView;

/// Pending work returned by an async handler.
pub type HookFuture<'a> = BoxFuture<'a, Result<()>>;

type SyncHandlerFn = dyn Fn(&mut FlowView) -> Result<()> + Send + Sync;
type AsyncHandlerFn = dyn for<'a> Fn(&'a mut FlowView) -> HookFuture<'a> + Send + Sync;

/// A hook handler supplied by an addon.
#[derive(Clone)]
pub enum Handler {
    /// Runs to completion before the next binding is considered.
    Sync(Arc<SyncHandlerFn>),
    /// Returns a future; may await external I/O without blocking other flows.
    Async(Arc<AsyncHandlerFn>),
}

/// Outcome of invoking a handler.
pub enum HandlerCall<'a> {
    Ready(Result<()>),
    Pending(HookFuture<'a>),
}

impl Handler {
    /// Wrap a synchronous handler.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut FlowView) -> Result<()> + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous handler.
    ///
    /// ```ignore
    /// Handler::asynchronous(|flow| Box::pin(async move {
    ///     flow.headers.set("x-seen", "1");
    ///     Ok(())
    /// }))
    /// ```
    pub fn asynchronous<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut FlowView) -> HookFuture<'a> + Send + Sync + 'static,
    {
        Handler::Async(Arc::new(f))
    }

    /// Invoke the handler against `flow`.
    pub fn call<'a>(&self, flow: &'a mut FlowView) -> HandlerCall<'a> {
        match self {
            Handler::Sync(f) => HandlerCall::Ready(f(flow)),
            Handler::Async(f) => HandlerCall::Pending(f(flow)),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Sync(_) => write!(f, "Handler::Sync"),
            Handler::Async(_) => write!(f, "Handler::Async"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_handler_is_ready() {
        let handler = Handler::sync(|flow| {
            flow.headers.set("x-sync", "1");
            Ok(())
        });
        let mut flow = FlowView::new("example.com", "GET", "/");
        assert!(matches!(handler.call(&mut flow), HandlerCall::Ready(Ok(()))));
        assert_eq!(flow.headers.get("x-sync"), Some("1"));
        assert!(!handler.is_async());
    }

    #[test]
    fn test_async_handler_is_pending() {
        let handler = Handler::asynchronous(|flow| {
            Box::pin(async move {
                flow.headers.set("x-async", "1");
                Ok(())
            })
        });
        let mut flow = FlowView::new("example.com", "GET", "/");
        match handler.call(&mut flow) {
            HandlerCall::Pending(fut) => futures::executor::block_on(fut).unwrap(),
            HandlerCall::Ready(_) => panic!("async handler must return pending work"),
        }
        assert_eq!(flow.headers.get("x-async"), Some("1"));
    }
}
