//! Member Transform Module
//!
//! Turns a method or read accessor into a memoized replacement with the
//! same call contract. The call context is passed explicitly and supplies
//! the instance container through `CacheHost`.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheController, CacheHost, CacheKey, CacheStats, EntryInfo};
use crate::config::{CacheConfig, CachePolicy, CacheScope};
use crate::error::{MemoError, Result};
use crate::memoize::intercept;

/// Method body: receives the context and the call arguments.
pub type Method<C, A, V> = Arc<dyn Fn(&C, A) -> V + Send + Sync>;
/// Read accessor body.
pub type Getter<C, V> = Arc<dyn Fn(&C) -> V + Send + Sync>;
/// Write accessor body.
pub type Setter<C, V> = Arc<dyn Fn(&C, V) + Send + Sync>;

// == Member ==
/// Original definition of a member, before transformation.
pub enum Member<C, A, V> {
    /// A callable member
    Method(Method<C, A, V>),
    /// A property with an optional getter and setter
    Accessor {
        get: Option<Getter<C, V>>,
        set: Option<Setter<C, V>>,
    },
    /// A plain data member; cannot be memoized
    Field(V),
}

impl<C, A, V> Member<C, A, V> {
    pub fn method<F>(method: F) -> Self
    where
        F: Fn(&C, A) -> V + Send + Sync + 'static,
    {
        Member::Method(Arc::new(method))
    }

    pub fn getter<G>(get: G) -> Self
    where
        G: Fn(&C) -> V + Send + Sync + 'static,
    {
        Member::Accessor {
            get: Some(Arc::new(get)),
            set: None,
        }
    }

    pub fn accessor<G, S>(get: G, set: S) -> Self
    where
        G: Fn(&C) -> V + Send + Sync + 'static,
        S: Fn(&C, V) + Send + Sync + 'static,
    {
        Member::Accessor {
            get: Some(Arc::new(get)),
            set: Some(Arc::new(set)),
        }
    }

    pub fn setter<S>(set: S) -> Self
    where
        S: Fn(&C, V) + Send + Sync + 'static,
    {
        Member::Accessor {
            get: None,
            set: Some(Arc::new(set)),
        }
    }

    pub fn field(value: V) -> Self {
        Member::Field(value)
    }
}

// == Cache Entry Point ==
/// Creates a member transform for `config`.
///
/// The config is validated here, before any member is transformed, so a
/// TTL policy without a positive ttl fails immediately.
///
/// ```
/// # use memo_cache::{cache, CacheConfig, CacheContainer, CacheHost, CacheKey, CachePolicy, MemberKind};
/// # struct Widget { width: u32, height: u32, cache: CacheContainer }
/// # impl CacheHost for Widget {
/// #     fn cache_container(&self) -> &CacheContainer { &self.cache }
/// # }
/// # fn main() -> memo_cache::Result<()> {
/// let widget = Widget { width: 3, height: 4, cache: CacheContainer::new() };
/// let area = cache(CacheConfig::new().with_policy(CachePolicy::Memo))?.method(
///     CacheKey::of::<Widget>("area", MemberKind::Instance),
///     |w: &Widget, (scale,): (u32,)| w.width * w.height * scale,
/// )?;
///
/// assert_eq!(area.call(&widget, (2,))?, 24);
/// assert_eq!(area.call(&widget, (2,))?, 24);
/// assert_eq!(area.stats().hits, 1);
/// # Ok(())
/// # }
/// ```
pub fn cache<A, V>(config: CacheConfig<A>) -> Result<MemberTransform<A, V>> {
    config.validate()?;
    Ok(MemberTransform {
        config,
        _values: PhantomData,
    })
}

// == Member Transform ==
/// Validated configuration waiting to be applied to one member.
pub struct MemberTransform<A, V> {
    config: CacheConfig<A>,
    _values: PhantomData<fn() -> V>,
}

impl<A, V> MemberTransform<A, V>
where
    A: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    // == Apply ==
    /// Produces the memoized replacement for `member`.
    ///
    /// # Errors
    /// `MemoError::Configuration` for write-only or empty accessors and for
    /// non-callable members.
    pub fn apply<C: CacheHost>(
        self,
        key: CacheKey,
        member: Member<C, A, V>,
    ) -> Result<MemoizedMember<C, A, V>> {
        match member {
            Member::Method(method) => self.wrap_method(key, method).map(MemoizedMember::Method),
            Member::Accessor { get: Some(get), set } => self
                .wrap_accessor(key, get, set)
                .map(MemoizedMember::Accessor),
            Member::Accessor { get: None, set: Some(_) } => Err(MemoError::Configuration(
                format!("setter of {} can't be memoized", key.label()),
            )),
            Member::Accessor { get: None, set: None } => Err(MemoError::Configuration(format!(
                "accessor {} has no getter",
                key.label()
            ))),
            Member::Field(_) => Err(MemoError::Configuration(format!(
                "{} is not callable; only methods and accessors can be memoized",
                key.label()
            ))),
        }
    }

    /// Memoizes a method.
    pub fn method<C, F>(self, key: CacheKey, method: F) -> Result<MemoizedMethod<C, A, V>>
    where
        C: CacheHost,
        F: Fn(&C, A) -> V + Send + Sync + 'static,
    {
        self.wrap_method(key, Arc::new(method))
    }

    /// Memoizes a read accessor, keeping `set` (if any) uncached.
    pub fn accessor<C: CacheHost>(
        self,
        key: CacheKey,
        get: Getter<C, V>,
        set: Option<Setter<C, V>>,
    ) -> Result<MemoizedAccessor<C, V>> {
        self.wrap_accessor(key, get, set)
    }

    fn wrap_method<C>(self, key: CacheKey, method: Method<C, A, V>) -> Result<MemoizedMethod<C, A, V>> {
        let controller = CacheController::new(self.config, key)?;
        debug!(key = %controller.key(), policy = ?controller.policy(), scope = ?controller.scope(), "method memoized");
        Ok(MemoizedMethod { controller, method })
    }

    fn wrap_accessor<C>(
        self,
        key: CacheKey,
        get: Getter<C, V>,
        set: Option<Setter<C, V>>,
    ) -> Result<MemoizedAccessor<C, V>> {
        // Getters take no arguments; all calls share the empty argument set
        let config = CacheConfig::<()>::new()
            .with_scope(self.config.scope)
            .with_policy(self.config.policy);
        let config = match self.config.ttl {
            Some(ttl) => config.with_ttl(ttl),
            None => config,
        };
        let controller = CacheController::new(config, key)?;
        debug!(key = %controller.key(), policy = ?controller.policy(), scope = ?controller.scope(), "accessor memoized");
        Ok(MemoizedAccessor {
            controller,
            get,
            set,
        })
    }
}

// == Memoized Member ==
/// Replacement produced by `MemberTransform::apply`.
pub enum MemoizedMember<C, A, V> {
    Method(MemoizedMethod<C, A, V>),
    Accessor(MemoizedAccessor<C, V>),
}

impl<C, A, V> MemoizedMember<C, A, V> {
    pub fn as_method(&self) -> Option<&MemoizedMethod<C, A, V>> {
        match self {
            MemoizedMember::Method(method) => Some(method),
            MemoizedMember::Accessor(_) => None,
        }
    }

    pub fn as_accessor(&self) -> Option<&MemoizedAccessor<C, V>> {
        match self {
            MemoizedMember::Accessor(accessor) => Some(accessor),
            MemoizedMember::Method(_) => None,
        }
    }
}

// == Memoized Method ==
/// A method whose results are cached per its controller's policy.
pub struct MemoizedMethod<C, A, V> {
    controller: CacheController<A, V>,
    method: Method<C, A, V>,
}

impl<C, A, V> MemoizedMethod<C, A, V>
where
    C: CacheHost,
    A: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Calls the method on `ctx`, returning a cached result when one
    /// matches.
    pub fn call(&self, ctx: &C, args: A) -> Result<V> {
        intercept(&self.controller, ctx.cache_container(), args, |args| {
            (self.method)(ctx, args)
        })
    }

    /// Metadata of the entries visible from `ctx`.
    pub fn entries(&self, ctx: &C) -> Result<Vec<EntryInfo>> {
        self.controller.entries(ctx.cache_container())
    }

    pub fn key(&self) -> &CacheKey {
        self.controller.key()
    }

    pub fn policy(&self) -> CachePolicy {
        self.controller.policy()
    }

    pub fn scope(&self) -> CacheScope {
        self.controller.scope()
    }

    pub fn stats(&self) -> CacheStats {
        self.controller.stats()
    }
}

// == Memoized Accessor ==
/// A property whose getter is cached and whose setter is passed through.
///
/// Assigning through the setter does not invalidate the cached value.
pub struct MemoizedAccessor<C, V> {
    controller: CacheController<(), V>,
    get: Getter<C, V>,
    set: Option<Setter<C, V>>,
}

impl<C, V> MemoizedAccessor<C, V>
where
    C: CacheHost,
    V: Clone + Send + 'static,
{
    /// Reads the property, computing it only on a cache miss.
    pub fn get(&self, ctx: &C) -> Result<V> {
        intercept(&self.controller, ctx.cache_container(), (), |()| {
            (self.get)(ctx)
        })
    }

    /// Forwards an assignment to the original setter.
    pub fn set(&self, ctx: &C, value: V) -> Result<()> {
        match &self.set {
            Some(set) => {
                set(ctx, value);
                Ok(())
            }
            None => Err(MemoError::ReadOnly(self.controller.key().label().to_string())),
        }
    }

    pub fn has_setter(&self) -> bool {
        self.set.is_some()
    }

    pub fn key(&self) -> &CacheKey {
        self.controller.key()
    }

    pub fn stats(&self) -> CacheStats {
        self.controller.stats()
    }
}
