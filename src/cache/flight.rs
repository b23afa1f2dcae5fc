//! In-Flight Computation Module
//!
//! Marks argument sets whose value is being computed so concurrent callers
//! wait for that result instead of computing it again.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::cache::{CacheContainer, CacheKey};

static NEXT_FLIGHT_ID: AtomicU64 = AtomicU64::new(1);

// == Flight Signal ==
/// One-shot completion flag shared between a computing caller and the
/// callers waiting on it.
#[derive(Debug, Default)]
pub(crate) struct FlightSignal {
    landed: Mutex<bool>,
    ready: Condvar,
}

impl FlightSignal {
    /// Blocks until `finish` has been called.
    pub(crate) fn wait(&self) {
        let mut landed = self.landed.lock().unwrap_or_else(PoisonError::into_inner);
        while !*landed {
            landed = self
                .ready
                .wait(landed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn finish(&self) {
        *self.landed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.ready.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.landed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Flight ==
/// A computation in progress for one argument set of one key.
pub(crate) struct Flight {
    pub(crate) id: u64,
    /// Arguments being computed, type-erased like the slot entries
    pub(crate) args: Box<dyn Any + Send>,
    /// Thread running the computation; re-entrant calls from it never wait
    pub(crate) owner: ThreadId,
    pub(crate) signal: Arc<FlightSignal>,
}

impl Flight {
    pub(crate) fn new<A: Send + 'static>(args: A) -> Self {
        Self {
            id: NEXT_FLIGHT_ID.fetch_add(1, Ordering::Relaxed),
            args: Box::new(args),
            owner: thread::current().id(),
            signal: Arc::new(FlightSignal::default()),
        }
    }

    pub(crate) fn args<A: 'static>(&self) -> Option<&A> {
        self.args.downcast_ref::<A>()
    }

    pub(crate) fn is_owned_by_current_thread(&self) -> bool {
        self.owner == thread::current().id()
    }
}

// == Flight Guard ==
/// Held by the caller computing a value. Dropping it, after the value has
/// been stored or because the computation panicked, removes the marker and
/// wakes every waiter.
pub(crate) struct FlightGuard<'a> {
    container: &'a CacheContainer,
    key: &'a CacheKey,
    id: u64,
    signal: Arc<FlightSignal>,
}

impl<'a> FlightGuard<'a> {
    pub(crate) fn new(
        container: &'a CacheContainer,
        key: &'a CacheKey,
        id: u64,
        signal: Arc<FlightSignal>,
    ) -> Self {
        Self {
            container,
            key,
            id,
            signal,
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let removed = self.container.with_slots(|slots| {
            if let Some(flights) = slots.flights.get_mut(self.key) {
                flights.retain(|flight| flight.id != self.id);
                if flights.is_empty() {
                    slots.flights.remove(self.key);
                }
            }
        });
        if removed.is_err() {
            debug!(key = %self.key, "in-flight marker released from a nested cache access");
        }
        self.signal.finish();
    }
}
