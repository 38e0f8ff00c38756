use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::Night;

type NightKey = (String, Night);

/// One async mutex per (hotel, night), created on demand and dropped once
/// nobody holds or waits for it.
#[derive(Default)]
pub struct NightLocks {
    locks: DashMap<NightKey, Arc<Mutex<()>>>,
}

/// Held locks for one stay. Released on drop.
pub struct StayLock<'a> {
    owner: &'a NightLocks,
    held: Vec<(NightKey, OwnedMutexGuard<()>)>,
}

impl NightLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every night of a stay. Nights are locked in chronological order
    /// so two overlapping stays can never deadlock.
    pub async fn lock_stay(&self, hotel_id: &str, nights: &[Night]) -> StayLock<'_> {
        let mut ordered: Vec<Night> = nights.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for night in ordered {
            let key = (hotel_id.to_string(), night);
            let lock = self.locks.entry(key.clone()).or_default().clone();
            let guard = lock.lock_owned().await;
            held.push((key, guard));
        }
        StayLock { owner: self, held }
    }

    /// Number of (hotel, night) locks currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for StayLock<'_> {
    fn drop(&mut self) {
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Only the map's own reference left: nobody holds or awaits it.
            self.owner
                .locks
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
