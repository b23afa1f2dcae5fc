//! Configuration Module
//!
//! Cache scope, storage policy, argument comparison and TTL settings.
//! `CacheOptions` holds the data-only settings and can be loaded from
//! environment variables or JSON; `CacheConfig` and `FunctionCacheConfig`
//! add the argument comparator.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MemoError, Result};

// == Cache Scope ==
/// Where cached entries live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// In the container owned by the receiving instance (or type, for statics)
    #[default]
    Instance,
    /// In the single process-wide container.
    ///
    /// Every global member shares one container lock, so a comparator of a
    /// global member must not call any other global member. Such a call
    /// fails with `MemoError::Reentrant` instead of blocking.
    Global,
}

impl FromStr for CacheScope {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" => Ok(CacheScope::Instance),
            "global" => Ok(CacheScope::Global),
            other => Err(MemoError::InvalidOptions(format!(
                "unknown cache scope '{}'",
                other
            ))),
        }
    }
}

// == Cache Policy ==
/// How a member's entry list is populated and retired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// First computed value is returned forever, whatever the arguments
    #[default]
    Singleton,
    /// One entry per distinct argument set, matched with the comparator
    Memo,
    /// Like `Singleton`, but the entry is dropped `ttl` after it was stored
    Ttl,
}

impl FromStr for CachePolicy {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "singleton" => Ok(CachePolicy::Singleton),
            "memo" => Ok(CachePolicy::Memo),
            "ttl" => Ok(CachePolicy::Ttl),
            other => Err(MemoError::InvalidOptions(format!(
                "unknown cache policy '{}'",
                other
            ))),
        }
    }
}

// == Comparator ==
/// Decides whether stored arguments match the arguments of a new call.
///
/// Invoked as `compare(stored, call)`; the order matters for asymmetric
/// comparators. A panicking comparator unwinds through the memoized call.
/// Comparators run while the container lock is held and must not call back
/// into a member cached in the same container; such a call returns
/// `MemoError::Reentrant`. Under global scope that is every global member.
pub struct Comparator<A> {
    compare: Arc<dyn Fn(&A, &A) -> bool + Send + Sync>,
}

impl<A> Comparator<A> {
    /// Wraps a comparison function.
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&A, &A) -> bool + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
        }
    }

    /// Returns true when `stored` arguments satisfy the `call` arguments.
    pub fn compare(&self, stored: &A, call: &A) -> bool {
        (self.compare)(stored, call)
    }
}

/// Element-wise equality: tuples and vectors compare length and then each
/// element in order.
impl<A: PartialEq + 'static> Default for Comparator<A> {
    fn default() -> Self {
        Self::new(|stored: &A, call: &A| stored == call)
    }
}

impl<A> Clone for Comparator<A> {
    fn clone(&self) -> Self {
        Self {
            compare: Arc::clone(&self.compare),
        }
    }
}

impl<A> fmt::Debug for Comparator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparator")
    }
}

// == Cache Options ==
/// Data-only cache settings.
///
/// All values have defaults and can be configured via environment variables
/// or JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Container selection (ignored by memoized functions)
    pub scope: CacheScope,
    /// Storage policy
    pub policy: CachePolicy,
    /// Entry lifetime in milliseconds, required when `policy` is `ttl`
    pub ttl_ms: Option<u64>,
}

impl CacheOptions {
    /// Loads options from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMO_CACHE_SCOPE` - `instance` or `global` (default: instance)
    /// - `MEMO_CACHE_POLICY` - `singleton`, `memo` or `ttl` (default: singleton)
    /// - `MEMO_CACHE_TTL_MS` - entry lifetime in milliseconds (default: unset)
    pub fn from_env() -> Result<Self> {
        let scope = match env::var("MEMO_CACHE_SCOPE") {
            Ok(v) => v.parse()?,
            Err(_) => CacheScope::default(),
        };
        let policy = match env::var("MEMO_CACHE_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => CachePolicy::default(),
        };
        let ttl_ms = match env::var("MEMO_CACHE_TTL_MS") {
            Ok(v) => Some(v.trim().parse::<u64>().map_err(|e| {
                MemoError::InvalidOptions(format!("MEMO_CACHE_TTL_MS '{}': {}", v, e))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            scope,
            policy,
            ttl_ms,
        })
    }

    /// Parses options from a JSON document, e.g.
    /// `{"scope": "global", "policy": "ttl", "ttl_ms": 500}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns the TTL as a Duration, if set.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

// == Cache Config ==
/// Full configuration for memoized members.
///
/// Bound once when a member is transformed and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CacheConfig<A> {
    pub scope: CacheScope,
    pub policy: CachePolicy,
    pub comparator: Comparator<A>,
    pub ttl: Option<Duration>,
}

impl<A: PartialEq + 'static> CacheConfig<A> {
    /// Instance scope, singleton policy, element-wise comparator.
    pub fn new() -> Self {
        Self::compared_by(|stored: &A, call: &A| stored == call)
    }

    /// Builds a config from data-only options with the default comparator.
    pub fn from_options(options: &CacheOptions) -> Self {
        Self::new().with_options(options)
    }
}

impl<A: PartialEq + 'static> Default for CacheConfig<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> CacheConfig<A> {
    /// Default settings with a custom comparator, for argument types that
    /// are not `PartialEq` or need a looser match.
    pub fn compared_by<F>(compare: F) -> Self
    where
        F: Fn(&A, &A) -> bool + Send + Sync + 'static,
    {
        Self {
            scope: CacheScope::default(),
            policy: CachePolicy::default(),
            comparator: Comparator::new(compare),
            ttl: None,
        }
    }

    pub fn with_scope(mut self, scope: CacheScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator<A>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Overrides scope, policy and ttl from data-only options.
    pub fn with_options(mut self, options: &CacheOptions) -> Self {
        self.scope = options.scope;
        self.policy = options.policy;
        self.ttl = options.ttl();
        self
    }

    // == Validate ==
    /// Rejects a TTL policy without a positive ttl.
    pub fn validate(&self) -> Result<()> {
        validate_ttl(self.policy, self.ttl)
    }
}

// == Function Cache Config ==
/// Configuration for `memoize_function`. There is no scope: every wrapped
/// function owns exactly one hidden container.
#[derive(Debug, Clone)]
pub struct FunctionCacheConfig<A> {
    pub policy: CachePolicy,
    pub comparator: Comparator<A>,
    pub ttl: Option<Duration>,
}

impl<A: PartialEq + 'static> FunctionCacheConfig<A> {
    /// Singleton policy with the element-wise comparator.
    pub fn new() -> Self {
        Self::compared_by(|stored: &A, call: &A| stored == call)
    }

    /// Builds a config from data-only options; `scope` is ignored.
    pub fn from_options(options: &CacheOptions) -> Self {
        let mut config = Self::new();
        config.policy = options.policy;
        config.ttl = options.ttl();
        config
    }
}

impl<A: PartialEq + 'static> Default for FunctionCacheConfig<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> FunctionCacheConfig<A> {
    /// Singleton policy with a custom comparator.
    pub fn compared_by<F>(compare: F) -> Self
    where
        F: Fn(&A, &A) -> bool + Send + Sync + 'static,
    {
        Self {
            policy: CachePolicy::default(),
            comparator: Comparator::new(compare),
            ttl: None,
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator<A>) -> Self {
        self.comparator = comparator;
        self
    }
}

impl<A> From<FunctionCacheConfig<A>> for CacheConfig<A> {
    fn from(config: FunctionCacheConfig<A>) -> Self {
        Self {
            scope: CacheScope::Instance,
            policy: config.policy,
            comparator: config.comparator,
            ttl: config.ttl,
        }
    }
}

fn validate_ttl(policy: CachePolicy, ttl: Option<Duration>) -> Result<()> {
    match (policy, ttl) {
        (CachePolicy::Ttl, None) => Err(MemoError::Configuration(
            "ttl required for the TTL cache policy".to_string(),
        )),
        (CachePolicy::Ttl, Some(ttl)) if ttl.is_zero() => Err(MemoError::Configuration(
            "ttl must be positive for the TTL cache policy".to_string(),
        )),
        _ => Ok(()),
    }
}
