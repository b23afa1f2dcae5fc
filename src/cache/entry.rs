//! Cache Entry Module
//!
//! Defines a memoized result together with the arguments that produced it.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Entry ==
/// A computed value and the call arguments it was computed for.
///
/// Entries are never mutated after they are stored; expiry removes the whole
/// entry list of a key.
#[derive(Debug, Clone)]
pub struct CacheEntry<A, V> {
    /// The computed value
    pub value: V,
    /// Arguments of the call that produced `value`
    pub args: A,
    /// Time the entry was stored
    pub created_at: DateTime<Utc>,
    /// Expiration time, None = no expiration. Informational only
    pub expires_at: Option<DateTime<Utc>>,
    /// Monotonic expiry deadline; wall clock changes do not move it
    deadline: Option<Instant>,
}

impl<A, V> CacheEntry<A, V> {
    // == Constructor ==
    /// Creates a new entry with optional TTL.
    ///
    /// # Arguments
    /// * `value` - The computed value
    /// * `args` - The call arguments
    /// * `ttl` - Optional lifetime of the entry
    pub fn new(value: V, args: A, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        // A ttl beyond the clock's range never expires
        let deadline = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let expires_at = ttl
            .filter(|_| deadline.is_some())
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            value,
            args,
            created_at: now,
            expires_at,
            deadline,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the monotonic clock reaches its deadline.
    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry never expires
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.deadline.map(|deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX)
        })
    }

    /// Metadata view of this entry.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            created_at: self.created_at,
            expires_at: self.expires_at,
            ttl_remaining_ms: self.ttl_remaining_ms(),
        }
    }
}

// == Entry Info ==
/// Serializable metadata about a stored entry, without value or arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ttl_remaining_ms: Option<u64>,
}
