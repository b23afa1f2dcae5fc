//! Cache Module
//!
//! Entry storage, per-member key namespacing, policy-aware lookup and store,
//! and container selection.

pub(crate) mod container;
mod controller;
mod entry;
pub(crate) mod flight;
mod key;
pub(crate) mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use container::{CacheContainer, CacheHost};
pub use controller::CacheController;
pub use entry::{CacheEntry, EntryInfo};
pub use key::{CacheKey, MemberKind};
pub use stats::CacheStats;
pub use store::CacheStore;
pub(crate) use store::Claim;
