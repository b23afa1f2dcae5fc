//! Memo Cache - method and function memoization
//!
//! Wraps methods, read accessors and free functions so repeated calls return
//! a previously computed result. Three policies are available: singleton
//! (first result forever), memo (one result per matching argument set) and
//! TTL (first result until it expires). Entries live in a container owned by
//! the receiving instance or in one process-wide container.

pub mod cache;
pub mod config;
pub mod error;
pub mod memoize;
mod tasks;

pub use cache::{CacheContainer, CacheHost, CacheKey, CacheStats, EntryInfo, MemberKind};
pub use config::{
    CacheConfig, CacheOptions, CachePolicy, CacheScope, Comparator, FunctionCacheConfig,
};
pub use error::{MemoError, Result};
pub use memoize::{
    cache, memoize_function, Member, MemberTransform, MemoizedAccessor, MemoizedFn,
    MemoizedMember, MemoizedMethod,
};
