//! Memoize Module
//!
//! Interception wrappers that route calls through a `CacheController`:
//! member transforms for methods and accessors, and standalone function
//! wrappers.
//!
//! Every intercepted call does the same thing: look up a cached value for
//! the call's arguments, and on a miss run the original computation (with
//! no lock held) and store its result. Callers on other threads that arrive
//! while a matching computation is running wait for its result.

mod function;
mod member;

pub use function::{memoize_function, MemoizedFn};
pub use member::{
    cache, Getter, Member, MemberTransform, MemoizedAccessor, MemoizedMember, MemoizedMethod,
    Method, Setter,
};

use crate::cache::{CacheContainer, CacheController, Claim};
use crate::error::Result;

/// Runs one call through `controller`, computing with `compute` on a miss.
pub(crate) fn intercept<A, V>(
    controller: &CacheController<A, V>,
    container: &CacheContainer,
    args: A,
    compute: impl FnOnce(A) -> V,
) -> Result<V>
where
    A: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let in_flight = match controller.begin(container, &args)? {
        Claim::Hit(value) => return Ok(value),
        Claim::Miss(in_flight) => in_flight,
    };
    let value = compute(args.clone());
    let stored = controller.store(container, value, args);
    drop(in_flight);
    stored
}
