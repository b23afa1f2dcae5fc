//! Function Memoization Module
//!
//! Wraps a free function so it behaves like a memoized member of one hidden
//! instance owned by the wrapper.

use std::any::type_name;
use std::fmt;

use tracing::debug;

use crate::cache::{CacheContainer, CacheController, CacheKey, CacheStats, EntryInfo};
use crate::config::FunctionCacheConfig;
use crate::error::Result;
use crate::memoize::intercept;

// == Memoized Function ==
/// A function whose results are cached in a container private to this
/// wrapper. Two wrappers of the same function never share entries.
pub struct MemoizedFn<A, V> {
    container: CacheContainer,
    controller: CacheController<A, V>,
    function: Box<dyn Fn(A) -> V + Send + Sync>,
}

/// Memoizes `function` with `config`.
///
/// Multi-argument functions take their arguments as a tuple:
///
/// ```
/// # use memo_cache::{memoize_function, CachePolicy, FunctionCacheConfig};
/// # fn main() -> memo_cache::Result<()> {
/// let add = memoize_function(
///     |(a, b): (i64, i64)| a + b,
///     FunctionCacheConfig::new().with_policy(CachePolicy::Memo),
/// )?;
/// assert_eq!(add.call((1, 2))?, 3);
/// assert_eq!(add.call((2, 2))?, 4);
/// assert_eq!(add.stats().misses, 2);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// `MemoError::Configuration` when the TTL policy has no positive ttl.
pub fn memoize_function<A, V, F>(function: F, config: FunctionCacheConfig<A>) -> Result<MemoizedFn<A, V>>
where
    A: Clone + Send + 'static,
    V: Clone + Send + 'static,
    F: Fn(A) -> V + Send + Sync + 'static,
{
    let key = CacheKey::named(type_name::<F>());
    let controller = CacheController::new(config.into(), key)?;
    debug!(key = %controller.key(), policy = ?controller.policy(), "function memoized");

    Ok(MemoizedFn {
        container: CacheContainer::new(),
        controller,
        function: Box::new(function),
    })
}

impl<A, V> MemoizedFn<A, V>
where
    A: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Calls the function, returning a cached result when one matches.
    pub fn call(&self, args: A) -> Result<V> {
        intercept(&self.controller, &self.container, args, |args| {
            (self.function)(args)
        })
    }

    /// Metadata of the cached entries.
    pub fn entries(&self) -> Result<Vec<EntryInfo>> {
        self.controller.entries(&self.container)
    }

    pub fn key(&self) -> &CacheKey {
        self.controller.key()
    }

    pub fn stats(&self) -> CacheStats {
        self.controller.stats()
    }
}

impl<A, V> fmt::Debug for MemoizedFn<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFn")
            .field("key", self.controller.key())
            .field("container", &self.container)
            .finish()
    }
}
