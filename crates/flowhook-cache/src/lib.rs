//! # Flowhook Cache
//!
//! Memoization for addon methods that do expensive lookups (DNS, remote
//! config, certificate metadata) on the flow path.
//!
//! - [`ResultCache`]: thread-safe key → value table bounded by entry count
//!   (least recently used goes first) and by age (TTL).
//! - [`Cached`]: wraps a function so identical arguments inside the TTL
//!   return the stored result instead of calling it again.

pub mod cache;
pub mod memo;

pub use cache::{CacheOptions, CacheStats, ResultCache};
pub use memo::{CacheKey, Cached};
