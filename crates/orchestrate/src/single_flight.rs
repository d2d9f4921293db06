//! Per-tenant single-flight: at most one pass per identity runs at a time.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Slot per identity plus the number of holders and waiters using it.
type Slots = Arc<Mutex<FxHashMap<String, (Arc<AsyncMutex<()>>, usize)>>>;

/// Later callers for a busy identity wait for the running pass to finish.
/// Different identities never contend.
#[derive(Clone, Default)]
pub struct SingleFlight {
    slots: Slots,
}

/// Counted use of an identity's slot, taken before waiting. The slot leaves
/// the map when the last user drops, cancelled waiters included.
struct Lease {
    identity: String,
    slots: Slots,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, users)) = slots.get_mut(&self.identity) {
            *users -= 1;
            if *users == 0 {
                slots.remove(&self.identity);
            }
        }
    }
}

/// Held for the duration of a pass. Dropping it releases the identity.
pub struct FlightGuard {
    // Field order matters: the lock is released before the lease.
    _guard: OwnedMutexGuard<()>,
    lease: Lease,
}

impl SingleFlight {
    pub fn new() -> Self { Self::default() }

    pub async fn acquire(&self, identity: &str) -> FlightGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let (slot, users) = slots.entry(identity.to_string()).or_insert_with(|| (Arc::default(), 0));
            *users += 1;
            Arc::clone(slot)
        };
        let lease = Lease { identity: identity.to_string(), slots: Arc::clone(&self.slots) };
        let guard = slot.lock_owned().await;
        FlightGuard { _guard: guard, lease }
    }

    /// Identities with a pass running or waiting.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl FlightGuard {
    pub fn identity(&self) -> &str { &self.lease.identity }
}
