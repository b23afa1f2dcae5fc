//! TTL Expiry Task
//!
//! One-shot timers that clear a key's entry list once its TTL has elapsed.
//! Timers run on a small dedicated tokio runtime so memoized code does not
//! need to be called from inside an async context.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::container::{lock, Slots};
use crate::cache::stats::StatsRecorder;
use crate::cache::CacheKey;
use crate::error::{MemoError, Result};

static EXPIRY_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Returns the timer runtime, starting it on first use.
pub(crate) fn expiry_runtime() -> Result<&'static Runtime> {
    if let Some(runtime) = EXPIRY_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("memo-cache-expiry")
        .enable_time()
        .build()?;

    match EXPIRY_RUNTIME.set(runtime) {
        Ok(()) => info!("TTL expiry scheduler started"),
        // Lost the race to another thread; this copy may be dropped from
        // inside an async context, where a blocking shutdown would panic
        Err(runtime) => runtime.shutdown_background(),
    }

    EXPIRY_RUNTIME
        .get()
        .ok_or_else(|| MemoError::Configuration("expiry scheduler unavailable".to_string()))
}

/// Spawns a one-shot task that removes the slot for `key` after `ttl`.
///
/// The task holds only a weak reference to the container, so a dropped
/// owner turns it into a no-op. It also does nothing when the slot has been
/// replaced since scheduling (its generation no longer matches).
///
/// # Arguments
/// * `runtime` - Runtime from `expiry_runtime`
/// * `slots` - Weak handle to the container's slots
/// * `key` - Key whose entry list should be cleared
/// * `generation` - Generation stamped on the slot when it was written
/// * `ttl` - Delay before clearing
/// * `stats` - Recorder of the member that owns the key
///
/// # Returns
/// A JoinHandle the slot keeps so the timer is aborted when the slot is
/// replaced or dropped first.
pub(crate) fn spawn_expiry_task(
    runtime: &Runtime,
    slots: Weak<Mutex<Slots>>,
    key: CacheKey,
    generation: u64,
    ttl: Duration,
    stats: Arc<StatsRecorder>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        tokio::time::sleep(ttl).await;

        let Some(shared) = slots.upgrade() else {
            debug!(key = %key, "TTL expiry: owner dropped");
            return;
        };

        let Ok(mut slots) = lock(&shared) else {
            debug!(key = %key, "TTL expiry: container busy on this thread");
            return;
        };
        let removed = {
            let current = slots
                .by_key
                .get_mut(&key)
                .filter(|slot| slot.generation == generation)
                .map(|slot| slot.detach_expiry())
                .is_some();
            if current {
                slots.by_key.remove(&key);
            }
            current
        };
        drop(slots);

        if removed {
            stats.record_expiration();
            debug!(key = %key, "TTL expiry: entries cleared");
        } else {
            debug!(key = %key, "TTL expiry: slot already replaced");
        }
    })
}
