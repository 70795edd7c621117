//! # Flowhook Host
//!
//! The glue a traffic-interception host embeds: loads addons, persists their
//! config and data, and owns the dispatcher and scheduler they feed.

pub mod host;
pub mod store;

pub use host::{AddonHost, AddonStatus};
pub use store::{FileDataStore, TomlConfigStore};
