//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check policy behavior over arbitrary call sequences.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::cache::{CacheContainer, CacheController, CacheKey, CacheStore};
use crate::config::{CacheConfig, CachePolicy, CacheScope, Comparator};

// == Strategies ==
/// Small argument domain so sequences revisit the same argument sets
fn args_strategy() -> impl Strategy<Value = (u8, u8)> {
    (0u8..4, 0u8..4)
}

fn calls_strategy() -> impl Strategy<Value = Vec<(u8, u8)>> {
    prop::collection::vec(args_strategy(), 1..40)
}

/// Runs `calls` through a store, computing a fresh value on every miss.
/// Returns the results and the number of computations.
fn run_calls(store: &CacheStore<(u8, u8), u64>, calls: &[(u8, u8)]) -> (Vec<u64>, u64) {
    let container = CacheContainer::new();
    let key = CacheKey::named("prop");
    let mut computed = 0u64;
    let mut results = Vec::with_capacity(calls.len());

    for args in calls {
        let value = match store.lookup(&container, &key, args).unwrap() {
            Some(value) => value,
            None => {
                computed += 1;
                store.store(&container, &key, computed, *args).unwrap()
            }
        };
        results.push(value);
    }
    (results, computed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property: Singleton returns the first result for every call,
    // whatever the arguments, and computes exactly once.
    #[test]
    fn prop_singleton_first_result_wins(calls in calls_strategy()) {
        let store = CacheStore::new(CachePolicy::Singleton, Comparator::default(), None);
        let (results, computed) = run_calls(&store, &calls);

        prop_assert_eq!(computed, 1);
        prop_assert!(results.iter().all(|v| *v == results[0]));
    }

    // Property: Memo computes once per distinct argument set, and equal
    // arguments always see the same value.
    #[test]
    fn prop_memo_once_per_argument_set(calls in calls_strategy()) {
        let store = CacheStore::new(CachePolicy::Memo, Comparator::default(), None);
        let (results, computed) = run_calls(&store, &calls);

        let distinct: HashSet<_> = calls.iter().collect();
        prop_assert_eq!(computed, distinct.len() as u64);

        let mut seen: HashMap<(u8, u8), u64> = HashMap::new();
        for (args, value) in calls.iter().zip(results) {
            let expected = *seen.entry(*args).or_insert(value);
            prop_assert_eq!(value, expected, "Equal arguments returned different values");
        }
    }

    // Property: distinct argument sets under Memo never share a value.
    #[test]
    fn prop_memo_distinct_arguments_distinct_values(calls in calls_strategy()) {
        let store = CacheStore::new(CachePolicy::Memo, Comparator::default(), None);
        let (results, _) = run_calls(&store, &calls);

        let mut by_value: HashMap<u64, (u8, u8)> = HashMap::new();
        for (args, value) in calls.iter().zip(results) {
            let owner = *by_value.entry(value).or_insert(*args);
            prop_assert_eq!(owner, *args);
        }
    }

    // Property: hits + misses equals the number of lookups, and stores
    // equals the number of computations.
    #[test]
    fn prop_statistics_accuracy(calls in calls_strategy()) {
        let store = CacheStore::new(CachePolicy::Memo, Comparator::default(), None);
        let (_, computed) = run_calls(&store, &calls);

        let stats = store.stats();
        prop_assert_eq!(stats.hits + stats.misses, calls.len() as u64);
        prop_assert_eq!(stats.misses, computed);
        prop_assert_eq!(stats.stores, computed);
    }

    // Property: instance scope keeps every container's entries private.
    #[test]
    fn prop_instance_isolation(values in prop::collection::vec(any::<u32>(), 2..10)) {
        let controller: CacheController<(), u32> =
            CacheController::new(CacheConfig::new(), CacheKey::named("isolated")).unwrap();
        let containers: Vec<CacheContainer> = values.iter().map(|_| CacheContainer::new()).collect();

        for (container, value) in containers.iter().zip(&values) {
            controller.store(container, *value, ()).unwrap();
        }
        for (container, value) in containers.iter().zip(&values) {
            prop_assert_eq!(controller.lookup(container, &()).unwrap(), Some(*value));
        }
    }

    // Property: global scope shares the first stored value across all
    // instances.
    #[test]
    fn prop_global_sharing(values in prop::collection::vec(any::<u32>(), 2..10)) {
        let controller: CacheController<(), u32> = CacheController::new(
            CacheConfig::new().with_scope(CacheScope::Global),
            CacheKey::named("shared"),
        )
        .unwrap();
        let containers: Vec<CacheContainer> = values.iter().map(|_| CacheContainer::new()).collect();

        for (container, value) in containers.iter().zip(&values) {
            controller.store(container, *value, ()).unwrap();
        }
        for container in &containers {
            prop_assert_eq!(controller.lookup(container, &()).unwrap(), Some(values[0]));
            prop_assert!(container.is_empty());
        }
    }
}
