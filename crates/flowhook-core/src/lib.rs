//! # Flowhook Core
//!
//! Shared vocabulary for the hook engine: the flow abstraction handed to
//! addon handlers, the addon lifecycle contract, the handler and job
//! function types, the error taxonomy and the engine configuration.
//!
//! ## Architecture
//! ```text
//! host transport ──▶ FlowView ──▶ Dispatcher (flowhook-hooks)
//!                                   ├── HookRegistry ──▶ ConditionRule (flowhook-rules)
//!                                   └── Handler::call(&mut FlowView)
//!
//! ServiceScheduler (flowhook-scheduler) ──▶ JobFunc(Kwargs)
//! ResultCache (flowhook-cache)          ◀── addon method bodies
//! ```

pub mod addon;
pub mod config;
pub mod error;
pub mod flow;
pub mod handler;
pub mod service;

pub use addon::{
    Addon, AddonContext, AddonDescriptor, ConfigStore, DataStore, HookMap, HookSpec, MemoryStore,
};
pub use config::FlowhookConfig;
pub use error::{FlowhookError, Result};
pub use flow::{FlowView, Headers, HookEventType};
pub use handler::{Handler, HandlerCall, HookFuture};
pub use service::{JobFunc, Kwargs, ServiceSpec, TriggerSpec};
