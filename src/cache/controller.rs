//! Cache Controller Module
//!
//! Binds a validated `CacheConfig` and a member key to concrete storage,
//! choosing between the caller's container and the global one.

use crate::cache::{CacheContainer, CacheKey, CacheStats, CacheStore, Claim, EntryInfo};
use crate::config::{CacheConfig, CachePolicy, CacheScope};
use crate::error::Result;

// == Cache Controller ==
/// Per-member cache controller.
pub struct CacheController<A, V> {
    scope: CacheScope,
    key: CacheKey,
    store: CacheStore<A, V>,
}

impl<A, V> CacheController<A, V>
where
    A: Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Validates `config` and binds it to `key`.
    ///
    /// Fails with `MemoError::Configuration` when the TTL policy has no
    /// positive ttl.
    pub fn new(config: CacheConfig<A>, key: CacheKey) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scope: config.scope,
            key,
            store: CacheStore::new(config.policy, config.comparator, config.ttl),
        })
    }

    // == Resolve Container ==
    /// Returns `instance` under instance scope and the process-wide
    /// container under global scope.
    pub fn resolve_container<'a>(&self, instance: &'a CacheContainer) -> &'a CacheContainer {
        match self.scope {
            CacheScope::Instance => instance,
            CacheScope::Global => CacheContainer::global(),
        }
    }

    /// Looks up the cached value for `args` in the resolved container.
    pub fn lookup(&self, instance: &CacheContainer, args: &A) -> Result<Option<V>> {
        self.store
            .lookup(self.resolve_container(instance), &self.key, args)
    }

    /// Looks up `args` in the resolved container and, on a miss, claims the
    /// computation so concurrent callers wait for it.
    pub(crate) fn begin<'a>(&'a self, instance: &'a CacheContainer, args: &A) -> Result<Claim<'a, V>>
    where
        A: Clone,
    {
        self.store
            .begin(self.resolve_container(instance), &self.key, args)
    }

    /// Stores a computed value in the resolved container.
    pub fn store(&self, instance: &CacheContainer, value: V, args: A) -> Result<V> {
        self.store
            .store(self.resolve_container(instance), &self.key, value, args)
    }

    /// Metadata of the live entries in the resolved container.
    pub fn entries(&self, instance: &CacheContainer) -> Result<Vec<EntryInfo>> {
        self.store.entries(self.resolve_container(instance), &self.key)
    }
}

impl<A, V> CacheController<A, V> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    pub fn policy(&self) -> CachePolicy {
        self.store.policy()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoError;
    use std::time::Duration;

    #[test]
    fn test_rejects_ttl_without_duration() {
        let config: CacheConfig<()> = CacheConfig::new().with_policy(CachePolicy::Ttl);
        let result: Result<CacheController<(), u8>> =
            CacheController::new(config, CacheKey::named("ttl"));
        assert!(matches!(result, Err(MemoError::Configuration(_))));
    }

    #[test]
    fn test_accepts_ttl_with_duration() {
        let config: CacheConfig<()> = CacheConfig::new()
            .with_policy(CachePolicy::Ttl)
            .with_ttl(Duration::from_millis(5));
        let controller: CacheController<(), u8> =
            CacheController::new(config, CacheKey::named("ttl")).unwrap();
        assert_eq!(controller.policy(), CachePolicy::Ttl);
    }

    #[test]
    fn test_instance_scope_uses_instance_container() {
        let controller: CacheController<(), u8> =
            CacheController::new(CacheConfig::new(), CacheKey::named("inst")).unwrap();
        let container = CacheContainer::new();

        let resolved = controller.resolve_container(&container);
        assert!(std::ptr::eq(resolved, &container));

        controller.store(&container, 4, ()).unwrap();
        assert!(container.contains(controller.key()));
        assert!(!CacheContainer::global().contains(controller.key()));
    }

    #[test]
    fn test_global_scope_uses_global_container() {
        let controller: CacheController<(), u8> = CacheController::new(
            CacheConfig::new().with_scope(CacheScope::Global),
            CacheKey::named("glob"),
        )
        .unwrap();
        let a = CacheContainer::new();
        let b = CacheContainer::new();

        assert!(std::ptr::eq(
            controller.resolve_container(&a),
            CacheContainer::global()
        ));

        controller.store(&a, 4, ()).unwrap();
        assert_eq!(controller.lookup(&b, &()).unwrap(), Some(4));
        assert!(a.is_empty());
    }
}
