//! Error types for the memoization engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Memo Error Enum ==
/// Unified error type for memoized members and functions.
///
/// Panics raised by a user comparator or by the wrapped computation are not
/// captured here; they unwind through the memoized call unchanged.
#[derive(Error, Debug)]
pub enum MemoError {
    /// Invalid cache configuration or an uncacheable member
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Assignment through an accessor that has no setter
    #[error("Accessor is read-only: {0}")]
    ReadOnly(String),

    /// A cache slot holds entries of a different type than requested
    #[error("Cache slot type mismatch: {0}")]
    TypeMismatch(String),

    /// The TTL timer runtime could not be started
    #[error("Failed to start expiry scheduler: {0}")]
    Scheduler(#[from] std::io::Error),

    /// Cache options could not be parsed
    #[error("Invalid cache options: {0}")]
    InvalidOptions(String),

    /// A comparator called back into the container it is comparing for
    #[error("Re-entrant cache access: {0}")]
    Reentrant(String),
}

impl From<serde_json::Error> for MemoError {
    fn from(err: serde_json::Error) -> Self {
        MemoError::InvalidOptions(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the memoization engine.
pub type Result<T> = std::result::Result<T, MemoError>;
