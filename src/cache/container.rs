//! Cache Container Module
//!
//! Mutex-guarded mapping from `CacheKey` to a member's entry list. Instances
//! embed one container each; a single static container backs global scope.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::flight::Flight;
use crate::cache::{CacheEntry, CacheKey};
use crate::error::{MemoError, Result};

static GLOBAL_CONTAINER: CacheContainer = CacheContainer::new();

thread_local! {
    /// Containers whose lock the current thread holds
    static HELD_LOCKS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

// == Slots ==
/// Everything guarded by one container lock.
#[derive(Default)]
pub(crate) struct Slots {
    /// Stored entry lists
    pub(crate) by_key: HashMap<CacheKey, Slot>,
    /// Argument sets currently being computed
    pub(crate) flights: HashMap<CacheKey, Vec<Flight>>,
}

// == Slot ==
/// Type-erased entry list of one key plus its pending expiry timer.
pub(crate) struct Slot {
    entries: Box<dyn Any + Send>,
    /// Stamp of the write that created this slot; timers only clear a
    /// slot whose generation they were scheduled for
    pub(crate) generation: u64,
    expiry: Option<JoinHandle<()>>,
}

impl Slot {
    pub(crate) fn new<A, V>(entries: Vec<CacheEntry<A, V>>, generation: u64) -> Self
    where
        A: Send + 'static,
        V: Send + 'static,
    {
        Self {
            entries: Box::new(entries),
            generation,
            expiry: None,
        }
    }

    pub(crate) fn entries<A, V>(&self, key: &CacheKey) -> Result<&Vec<CacheEntry<A, V>>>
    where
        A: 'static,
        V: 'static,
    {
        self.entries
            .downcast_ref::<Vec<CacheEntry<A, V>>>()
            .ok_or_else(|| mismatch(key))
    }

    pub(crate) fn entries_mut<A, V>(
        &mut self,
        key: &CacheKey,
    ) -> Result<&mut Vec<CacheEntry<A, V>>>
    where
        A: 'static,
        V: 'static,
    {
        self.entries
            .downcast_mut::<Vec<CacheEntry<A, V>>>()
            .ok_or_else(|| mismatch(key))
    }

    /// Attaches the timer that will clear this slot.
    pub(crate) fn set_expiry(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.expiry.replace(task) {
            previous.abort();
        }
    }

    /// Forgets the timer without aborting it, used by the timer itself.
    pub(crate) fn detach_expiry(&mut self) {
        self.expiry = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(task) = self.expiry.take() {
            task.abort();
        }
    }
}

fn mismatch(key: &CacheKey) -> MemoError {
    warn!(key = %key, "cache slot holds entries of another type");
    MemoError::TypeMismatch(key.to_string())
}

// == Cache Container ==
/// Storage for the entry lists of every memoized member bound to one owner.
///
/// The map is allocated on the first write; dropping the container drops all
/// entries and aborts their pending expiry timers.
pub struct CacheContainer {
    slots: OnceLock<Arc<Mutex<Slots>>>,
}

impl CacheContainer {
    // == Constructor ==
    /// Creates an empty container. Usable in `static` items for
    /// type-level members.
    pub const fn new() -> Self {
        Self {
            slots: OnceLock::new(),
        }
    }

    /// The single process-wide container used by global-scope members.
    pub fn global() -> &'static CacheContainer {
        &GLOBAL_CONTAINER
    }

    /// Runs `f` on the slots if the container has ever been written to.
    pub(crate) fn with_existing<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> Result<Option<R>> {
        match self.slots.get() {
            Some(shared) => Ok(Some(f(&mut *lock(shared)?))),
            None => Ok(None),
        }
    }

    /// Runs `f` on the slots, allocating them on first use.
    pub(crate) fn with_slots<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> Result<R> {
        Ok(f(&mut *lock(self.shared())?))
    }

    /// Weak handle to the slots, for deferred tasks that must not keep the
    /// owner alive.
    pub(crate) fn downgrade(&self) -> Weak<Mutex<Slots>> {
        Arc::downgrade(self.shared())
    }

    fn shared(&self) -> &Arc<Mutex<Slots>> {
        self.slots.get_or_init(|| Arc::new(Mutex::new(Slots::default())))
    }

    // == Inspection ==
    /// Number of keys that currently hold entries.
    pub fn len(&self) -> usize {
        self.with_existing(|slots| slots.by_key.len())
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` currently holds entries in this container.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.with_existing(|slots| slots.by_key.contains_key(key))
            .ok()
            .flatten()
            .unwrap_or(false)
    }
}

impl Default for CacheContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContainer")
            .field("keys", &self.len())
            .finish()
    }
}

// == Lock ==
/// Guard over a container's slots that also tracks the lock as held by the
/// current thread.
pub(crate) struct SlotsGuard<'a> {
    guard: MutexGuard<'a, Slots>,
    addr: usize,
}

impl Deref for SlotsGuard<'_> {
    type Target = Slots;

    fn deref(&self) -> &Slots {
        &self.guard
    }
}

impl DerefMut for SlotsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Slots {
        &mut self.guard
    }
}

impl Drop for SlotsGuard<'_> {
    fn drop(&mut self) {
        let _ = HELD_LOCKS.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|addr| *addr == self.addr) {
                held.remove(pos);
            }
        });
    }
}

/// Locks the slots, recovering from poisoning. A comparator may panic while
/// the lock is held, but it only runs before any mutation of the map.
///
/// Fails with `MemoError::Reentrant` when the current thread already holds
/// this container's lock, which happens when a comparator calls a member
/// cached in the same container. Waiting would deadlock.
pub(crate) fn lock(shared: &Mutex<Slots>) -> Result<SlotsGuard<'_>> {
    let addr = shared as *const Mutex<Slots> as usize;
    let reentrant = HELD_LOCKS
        .try_with(|held| held.borrow().contains(&addr))
        .unwrap_or(false);
    if reentrant {
        return Err(MemoError::Reentrant(
            "cache container accessed from inside one of its own comparators".to_string(),
        ));
    }

    let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = HELD_LOCKS.try_with(|held| held.borrow_mut().push(addr));
    Ok(SlotsGuard { guard, addr })
}

// == Cache Host ==
/// Implemented by types that own a container for their memoized members.
///
/// ```
/// use memo_cache::{CacheContainer, CacheHost};
///
/// #[derive(Default)]
/// struct Widget {
///     cache: CacheContainer,
/// }
///
/// impl CacheHost for Widget {
///     fn cache_container(&self) -> &CacheContainer {
///         &self.cache
///     }
/// }
///
/// let widget = Widget::default();
/// assert!(widget.cache_container().is_empty());
/// ```
pub trait CacheHost {
    fn cache_container(&self) -> &CacheContainer;
}

/// A container is its own host; static members pass their type-level
/// container as the call context.
impl CacheHost for CacheContainer {
    fn cache_container(&self) -> &CacheContainer {
        self
    }
}
