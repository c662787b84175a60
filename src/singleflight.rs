//! Per-key exclusion guards for regeneration
//!
//! At most one regeneration per key runs in a process. A caller that misses
//! its memory slot takes the key's guard, then re-checks the slot: if a
//! concurrent caller already regenerated, the result is reused.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hash;
use std::sync::Arc;

/// Map of per-key mutexes
#[derive(Debug)]
pub struct SingleFlight<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> SingleFlight<K> {
    /// Create an empty guard table
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// The guard mutex for `key`, created on first use.
    ///
    /// Lock it in the caller's scope:
    /// `let lock = flights.lock_for(k); let _guard = lock.lock();`
    #[must_use]
    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// True while some caller holds the guard for `key`
    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.locks.get(key).is_some_and(|lock| lock.is_locked())
    }

    /// Run `f` while holding the guard for `key`
    pub fn run<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard: MutexGuard<'_, ()> = lock.lock();
        f()
    }
}

impl<K: Eq + Hash + Clone> Default for SingleFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}
