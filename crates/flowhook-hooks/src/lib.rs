//! # Flowhook Hooks
//!
//! Decides, for every intercepted flow, which addon handlers fire and in
//! what order.
//!
//! ## Architecture
//! ```text
//! host ──▶ Dispatcher::dispatch(event, &mut flow)
//!            ├── HookRegistry::bindings(event)   (atomic snapshot)
//!            └── for binding in order (addon order, name, sequence):
//!                  ├── skip if addon disabled
//!                  ├── ConditionRule::evaluate(flow)
//!                  └── Handler::call(flow) → Ready | Pending (awaited)
//! ```
//!
//! Flows run in parallel with each other; one flow's handler chain for a
//! phase is strictly sequential so later handlers see earlier mutations.

pub mod dispatch;
pub mod registry;

pub use dispatch::{DispatchReport, Dispatcher};
pub use registry::{HookBinding, HookRegistry, RejectedRule};
