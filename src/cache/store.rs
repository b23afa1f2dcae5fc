//! Cache Store Module
//!
//! Policy-aware lookup and store of entry lists inside a container.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::container::{Slot, Slots};
use crate::cache::flight::{Flight, FlightGuard, FlightSignal};
use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheContainer, CacheEntry, CacheKey, CacheStats, EntryInfo};
use crate::config::{CachePolicy, Comparator};
use crate::error::{MemoError, Result};
use crate::tasks::{expiry_runtime, spawn_expiry_task};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

// == Claim ==
/// Outcome of `CacheStore::begin`.
pub(crate) enum Claim<'a, V> {
    /// A cached value matched the call
    Hit(V),
    /// The caller must compute. The guard is None for a re-entrant call from
    /// the thread already computing a matching argument set.
    Miss(Option<FlightGuard<'a>>),
}

enum Step<V> {
    Hit(V),
    Reenter,
    Wait(Arc<FlightSignal>),
    Claimed(u64, Arc<FlightSignal>),
}

// == Cache Store ==
/// Reads and writes one member's entry list according to its policy.
///
/// The store holds no entries itself; every operation names the container
/// and key to act on. Each operation runs under the container lock, so a
/// `lookup` followed by `store` never loses an update: if another caller
/// stored a matching entry in between, `store` keeps and returns that one.
/// Intercepted calls go through `begin`, which also keeps concurrent
/// callers from computing the same value twice.
pub struct CacheStore<A, V> {
    policy: CachePolicy,
    comparator: Comparator<A>,
    ttl: Option<Duration>,
    stats: Arc<StatsRecorder>,
    _values: PhantomData<fn() -> V>,
}

impl<A, V> CacheStore<A, V>
where
    A: Send + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a store for one member.
    ///
    /// # Arguments
    /// * `policy` - Singleton, Memo or TTL
    /// * `comparator` - Argument matcher used by the Memo policy
    /// * `ttl` - Entry lifetime, required by the TTL policy
    pub fn new(policy: CachePolicy, comparator: Comparator<A>, ttl: Option<Duration>) -> Self {
        Self {
            policy,
            comparator,
            ttl,
            stats: Arc::new(StatsRecorder::default()),
            _values: PhantomData,
        }
    }

    // == Lookup ==
    /// Returns the cached value for a call, or None on a miss.
    ///
    /// Singleton and TTL return the single stored value whatever `args` are.
    /// Memo returns the first entry, in insertion order, whose stored
    /// arguments satisfy `comparator(stored, args)`. An expired TTL entry is
    /// removed and reported as a miss.
    pub fn lookup(&self, container: &CacheContainer, key: &CacheKey, args: &A) -> Result<Option<V>> {
        let found = container
            .with_existing(|slots| self.find(slots, key, args))?
            .transpose()?
            .flatten();

        match found {
            Some(value) => {
                self.stats.record_hit();
                debug!(key = %key, "cache hit");
                Ok(Some(value))
            }
            None => {
                self.stats.record_miss();
                debug!(key = %key, "cache miss");
                Ok(None)
            }
        }
    }

    // == Begin ==
    /// Looks up a call and, on a miss, claims the right to compute it.
    ///
    /// While one caller computes for an argument set (any arguments under
    /// Singleton/TTL, comparator-matched ones under Memo), callers on other
    /// threads block until that computation finishes and then look again.
    /// A call from the computing thread itself never blocks, so recursive
    /// memoized calls still make progress.
    ///
    /// # Arguments
    /// * `container` - Container holding the entries
    /// * `key` - Member key
    /// * `args` - Call arguments, cloned into the in-flight marker
    ///
    /// # Returns
    /// `Claim::Hit` with the cached value, or `Claim::Miss` whose guard must
    /// be held until the computed value has been stored.
    pub(crate) fn begin<'a>(
        &self,
        container: &'a CacheContainer,
        key: &'a CacheKey,
        args: &A,
    ) -> Result<Claim<'a, V>>
    where
        A: Clone,
    {
        loop {
            let step = container.with_slots(|slots| self.step(slots, key, args))??;
            match step {
                Step::Hit(value) => {
                    self.stats.record_hit();
                    debug!(key = %key, "cache hit");
                    return Ok(Claim::Hit(value));
                }
                Step::Wait(signal) => {
                    debug!(key = %key, "waiting for in-flight computation");
                    signal.wait();
                }
                Step::Reenter => {
                    self.stats.record_miss();
                    debug!(key = %key, "cache miss, re-entrant call");
                    return Ok(Claim::Miss(None));
                }
                Step::Claimed(id, signal) => {
                    self.stats.record_miss();
                    debug!(key = %key, "cache miss");
                    return Ok(Claim::Miss(Some(FlightGuard::new(
                        container, key, id, signal,
                    ))));
                }
            }
        }
    }

    fn step(&self, slots: &mut Slots, key: &CacheKey, args: &A) -> Result<Step<V>>
    where
        A: Clone,
    {
        if let Some(value) = self.find(slots, key, args)? {
            return Ok(Step::Hit(value));
        }

        let pending = slots.flights.get(key).and_then(|flights| {
            flights.iter().find(|flight| match self.policy {
                CachePolicy::Memo => flight
                    .args::<A>()
                    .is_some_and(|stored| self.comparator.compare(stored, args)),
                CachePolicy::Singleton | CachePolicy::Ttl => true,
            })
        });
        match pending {
            Some(flight) if flight.is_owned_by_current_thread() => Ok(Step::Reenter),
            Some(flight) => Ok(Step::Wait(Arc::clone(&flight.signal))),
            None => {
                let flight = Flight::new(args.clone());
                let claimed = Step::Claimed(flight.id, Arc::clone(&flight.signal));
                slots.flights.entry(key.clone()).or_default().push(flight);
                Ok(claimed)
            }
        }
    }

    // == Store ==
    /// Records a computed value and returns the value now cached for `args`.
    ///
    /// - No entry list yet: creates one holding `(value, args)`.
    /// - Memo: appends only if no stored arguments match `args`.
    /// - Singleton/TTL: the first write persists; later values are dropped.
    /// - TTL: a newly created entry list is cleared `ttl` after this call.
    ///
    /// When an existing entry wins, its value is returned instead of
    /// `value`; single-threaded callers always get `value` back.
    pub fn store(&self, container: &CacheContainer, key: &CacheKey, value: V, args: A) -> Result<V> {
        let ttl = match (self.policy, self.ttl) {
            (CachePolicy::Ttl, Some(ttl)) if !ttl.is_zero() => Some(ttl),
            (CachePolicy::Ttl, _) => {
                return Err(MemoError::Configuration(
                    "ttl required for the TTL cache policy".to_string(),
                ))
            }
            _ => None,
        };
        let runtime = match ttl {
            Some(_) => Some(expiry_runtime()?),
            None => None,
        };
        let owner = container.downgrade();

        container.with_slots(|slots| {
            self.evict_expired(slots, key)?;

            if let Some(slot) = slots.by_key.get_mut(key) {
                let entries = slot.entries_mut::<A, V>(key)?;
                if let Some(resident) = self.matching(entries, &args) {
                    debug!(key = %key, "store skipped, matching entry already cached");
                    return Ok(resident.value.clone());
                }
                entries.push(CacheEntry::new(value.clone(), args, ttl));
                self.stats.record_store();
                debug!(key = %key, entries = entries.len(), "cache store");
                return Ok(value);
            }

            let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
            let mut slot = Slot::new(vec![CacheEntry::new(value.clone(), args, ttl)], generation);
            if let (Some(runtime), Some(ttl)) = (runtime, ttl) {
                slot.set_expiry(spawn_expiry_task(
                    runtime,
                    owner,
                    key.clone(),
                    generation,
                    ttl,
                    Arc::clone(&self.stats),
                ));
            }
            slots.by_key.insert(key.clone(), slot);
            self.stats.record_store();
            debug!(key = %key, entries = 1, "cache store");
            Ok(value)
        })?
    }

    // == Entries ==
    /// Metadata of the live entries for `key`, in insertion order.
    pub fn entries(&self, container: &CacheContainer, key: &CacheKey) -> Result<Vec<EntryInfo>> {
        container
            .with_existing(|slots| match slots.by_key.get(key) {
                Some(slot) => Ok(slot
                    .entries::<A, V>(key)?
                    .iter()
                    .filter(|entry| !entry.is_expired())
                    .map(CacheEntry::info)
                    .collect()),
                None => Ok(Vec::new()),
            })?
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn find(&self, slots: &mut Slots, key: &CacheKey, args: &A) -> Result<Option<V>> {
        if self.evict_expired(slots, key)? {
            return Ok(None);
        }
        let Some(slot) = slots.by_key.get(key) else {
            return Ok(None);
        };
        let entries = slot.entries::<A, V>(key)?;
        Ok(self.matching(entries, args).map(|entry| entry.value.clone()))
    }

    fn matching<'e>(
        &self,
        entries: &'e [CacheEntry<A, V>],
        args: &A,
    ) -> Option<&'e CacheEntry<A, V>> {
        match self.policy {
            CachePolicy::Memo => entries
                .iter()
                .find(|entry| self.comparator.compare(&entry.args, args)),
            CachePolicy::Singleton | CachePolicy::Ttl => entries.first(),
        }
    }

    /// Removes the slot for `key` if its entries have expired, in case the
    /// timer has not fired yet.
    fn evict_expired(&self, slots: &mut Slots, key: &CacheKey) -> Result<bool> {
        let expired = match slots.by_key.get(key) {
            Some(slot) => slot.entries::<A, V>(key)?.iter().any(CacheEntry::is_expired),
            None => false,
        };
        if expired {
            slots.by_key.remove(key);
            self.stats.record_expiration();
            debug!(key = %key, "expired entries removed on access");
        }
        Ok(expired)
    }
}

impl<A, V> CacheStore<A, V> {
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    // == Stats ==
    /// Returns the member's current counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread::{self, sleep};

    fn store(policy: CachePolicy) -> CacheStore<(u32, u32), u64> {
        CacheStore::new(policy, Comparator::default(), None)
    }

    #[test]
    fn test_lookup_empty_container() {
        let container = CacheContainer::new();
        let key = CacheKey::named("empty");
        let store = store(CachePolicy::Singleton);

        assert_eq!(store.lookup(&container, &key, &(1, 2)).unwrap(), None);
        assert_eq!(store.stats().misses, 1);
        assert!(container.is_empty());
    }

    #[test]
    fn test_singleton_ignores_arguments() {
        let container = CacheContainer::new();
        let key = CacheKey::named("singleton");
        let store = store(CachePolicy::Singleton);

        assert_eq!(store.store(&container, &key, 10, (1, 2)).unwrap(), 10);
        assert_eq!(store.lookup(&container, &key, &(3, 4)).unwrap(), Some(10));
    }

    #[test]
    fn test_singleton_first_write_wins() {
        let container = CacheContainer::new();
        let key = CacheKey::named("first_wins");
        let store = store(CachePolicy::Singleton);

        store.store(&container, &key, 10, (1, 2)).unwrap();
        assert_eq!(store.store(&container, &key, 20, (5, 6)).unwrap(), 10);
        assert_eq!(store.lookup(&container, &key, &(5, 6)).unwrap(), Some(10));
        assert_eq!(store.stats().stores, 1);
    }

    #[test]
    fn test_memo_matches_arguments() {
        let container = CacheContainer::new();
        let key = CacheKey::named("memo");
        let store = store(CachePolicy::Memo);

        store.store(&container, &key, 3, (1, 2)).unwrap();
        store.store(&container, &key, 4, (1, 3)).unwrap();

        assert_eq!(store.lookup(&container, &key, &(1, 2)).unwrap(), Some(3));
        assert_eq!(store.lookup(&container, &key, &(1, 3)).unwrap(), Some(4));
        assert_eq!(store.lookup(&container, &key, &(2, 1)).unwrap(), None);
        assert_eq!(store.entries(&container, &key).unwrap().len(), 2);
    }

    #[test]
    fn test_memo_does_not_duplicate_entries() {
        let container = CacheContainer::new();
        let key = CacheKey::named("memo_dup");
        let store = store(CachePolicy::Memo);

        store.store(&container, &key, 3, (1, 2)).unwrap();
        assert_eq!(store.store(&container, &key, 99, (1, 2)).unwrap(), 3);
        assert_eq!(store.entries(&container, &key).unwrap().len(), 1);
    }

    #[test]
    fn test_memo_returns_first_match_in_insertion_order() {
        let container = CacheContainer::new();
        let key = CacheKey::named("memo_order");
        let store: CacheStore<u32, &str> = CacheStore::new(
            CachePolicy::Memo,
            Comparator::new(|stored: &u32, call: &u32| stored % 2 == call % 2),
            None,
        );

        store.store(&container, &key, "odd", 1).unwrap();
        store.store(&container, &key, "even", 2).unwrap();

        assert_eq!(store.lookup(&container, &key, &7).unwrap(), Some("odd"));
        assert_eq!(store.lookup(&container, &key, &8).unwrap(), Some("even"));
    }

    #[test]
    fn test_comparator_receives_stored_then_call() {
        let container = CacheContainer::new();
        let key = CacheKey::named("asymmetric");
        let store: CacheStore<u32, u32> = CacheStore::new(
            CachePolicy::Memo,
            Comparator::new(|stored: &u32, call: &u32| stored <= call),
            None,
        );

        store.store(&container, &key, 50, 5).unwrap();
        assert_eq!(store.lookup(&container, &key, &6).unwrap(), Some(50));
        assert_eq!(store.lookup(&container, &key, &4).unwrap(), None);
    }

    #[test]
    fn test_ttl_requires_duration() {
        let container = CacheContainer::new();
        let key = CacheKey::named("ttl_missing");
        let store = store(CachePolicy::Ttl);

        let result = store.store(&container, &key, 1, (0, 0));
        assert!(matches!(result, Err(MemoError::Configuration(_))));
        assert!(container.is_empty());
    }

    #[test]
    fn test_ttl_expiration() {
        let container = CacheContainer::new();
        let key = CacheKey::named("ttl");
        let store: CacheStore<(u32, u32), u64> = CacheStore::new(
            CachePolicy::Ttl,
            Comparator::default(),
            Some(Duration::from_millis(60)),
        );

        store.store(&container, &key, 1, (0, 0)).unwrap();
        assert_eq!(store.lookup(&container, &key, &(9, 9)).unwrap(), Some(1));
        assert_eq!(store.entries(&container, &key).unwrap().len(), 1);

        sleep(Duration::from_millis(150));

        assert_eq!(store.lookup(&container, &key, &(0, 0)).unwrap(), None);
        assert!(!container.contains(&key));
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_ttl_restarts_after_expiry() {
        let container = CacheContainer::new();
        let key = CacheKey::named("ttl_restart");
        let store: CacheStore<(), u64> = CacheStore::new(
            CachePolicy::Ttl,
            Comparator::default(),
            Some(Duration::from_millis(40)),
        );

        store.store(&container, &key, 1, ()).unwrap();
        sleep(Duration::from_millis(100));
        assert_eq!(store.store(&container, &key, 2, ()).unwrap(), 2);
        assert_eq!(store.lookup(&container, &key, &()).unwrap(), Some(2));
    }

    #[test]
    fn test_type_mismatch() {
        let container = CacheContainer::new();
        let key = CacheKey::named("shared");
        let numbers = store(CachePolicy::Singleton);
        let strings: CacheStore<(u32, u32), String> =
            CacheStore::new(CachePolicy::Singleton, Comparator::default(), None);

        numbers.store(&container, &key, 1, (0, 0)).unwrap();
        let result = strings.lookup(&container, &key, &(0, 0));
        assert!(matches!(result, Err(MemoError::TypeMismatch(_))));
    }

    #[test]
    fn test_comparator_panic_propagates_and_store_recovers() {
        let container = CacheContainer::new();
        let key = CacheKey::named("panicky");
        let store: CacheStore<u32, u32> = CacheStore::new(
            CachePolicy::Memo,
            Comparator::new(|stored: &u32, call: &u32| {
                if *call == 13 {
                    panic!("unlucky argument");
                }
                stored == call
            }),
            None,
        );
        store.store(&container, &key, 1, 1).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| store.lookup(&container, &key, &13)));
        assert!(result.is_err(), "comparator panic should propagate");

        assert_eq!(store.lookup(&container, &key, &1).unwrap(), Some(1));
    }

    /// Runs one call through `begin`, computing with `compute` on a miss.
    fn call<A, V>(
        store: &CacheStore<A, V>,
        container: &CacheContainer,
        key: &CacheKey,
        args: A,
        compute: impl FnOnce() -> V,
    ) -> V
    where
        A: Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        match store.begin(container, key, &args).unwrap() {
            Claim::Hit(value) => value,
            Claim::Miss(guard) => {
                let value = store.store(container, key, compute(), args).unwrap();
                drop(guard);
                value
            }
        }
    }

    #[test]
    fn test_begin_computes_once_for_concurrent_callers() {
        let container = CacheContainer::new();
        let key = CacheKey::named("concurrent");
        let store: CacheStore<(), u64> =
            CacheStore::new(CachePolicy::Singleton, Comparator::default(), None);
        let computed = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let values: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let (store, container, key) = (&store, &container, &key);
                    let (computed, barrier) = (&computed, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        call(store, container, key, (), || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(50));
                            i
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| *v == values[0]));
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
        assert_eq!(stats.stores, 1);
    }

    #[test]
    fn test_begin_memo_waits_only_for_matching_arguments() {
        let container = CacheContainer::new();
        let key = CacheKey::named("memo_flights");
        let store: CacheStore<u32, u32> =
            CacheStore::new(CachePolicy::Memo, Comparator::default(), None);

        let Claim::Miss(Some(first)) = store.begin(&container, &key, &1).unwrap() else {
            panic!("first call should claim the computation");
        };

        // Other arguments are not blocked by the pending computation
        thread::scope(|scope| {
            let other = scope.spawn(|| call(&store, &container, &key, 2, || 20));
            assert_eq!(other.join().unwrap(), 20);
        });

        let waiter = thread::scope(|scope| {
            let handle = scope.spawn(|| call(&store, &container, &key, 1, || 99));
            sleep(Duration::from_millis(30));
            assert!(!handle.is_finished(), "equal arguments should wait");
            store.store(&container, &key, 10, 1).unwrap();
            drop(first);
            handle.join().unwrap()
        });
        assert_eq!(waiter, 10);
    }

    #[test]
    fn test_begin_reentrant_call_does_not_wait() {
        let container = CacheContainer::new();
        let key = CacheKey::named("reentrant");
        let store = store(CachePolicy::Singleton);

        let Claim::Miss(Some(outer)) = store.begin(&container, &key, &(1, 1)).unwrap() else {
            panic!("first call should claim the computation");
        };
        let inner = store.begin(&container, &key, &(2, 2)).unwrap();
        assert!(matches!(inner, Claim::Miss(None)));

        store.store(&container, &key, 5, (2, 2)).unwrap();
        drop(outer);
        assert!(matches!(
            store.begin(&container, &key, &(1, 1)).unwrap(),
            Claim::Hit(5)
        ));
    }

    #[test]
    fn test_begin_recovers_when_computation_panics() {
        let container = CacheContainer::new();
        let key = CacheKey::named("panicked_flight");
        let store = store(CachePolicy::Singleton);

        let result = catch_unwind(AssertUnwindSafe(|| {
            call(&store, &container, &key, (0, 0), || panic!("compute failed"))
        }));
        assert!(result.is_err());

        let pending = container
            .with_slots(|slots| slots.flights.contains_key(&key))
            .unwrap();
        assert!(!pending, "panicked computation should release its marker");
        assert_eq!(call(&store, &container, &key, (0, 0), || 3), 3);
    }
}
