use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// One async mutex per id, created on first use and dropped again once the
/// last holder or waiter lets go.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

/// Holds the lock for one id. Dropping it releases the lock and forgets the
/// entry when nobody else is queued on it.
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    id: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Ulid) -> KeyedGuard<'_> {
        let lock = self.locks.entry(id).or_default().value().clone();
        KeyedGuard {
            owner: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Ids with a live entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Clones only happen under the shard lock, so a count of one here
        // means no task can be waiting on this mutex.
        self.owner
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
