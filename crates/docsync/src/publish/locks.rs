//! Per-key exclusive locks for publishing.
//!
//! One async mutex per (path, branch). Entries are created on demand and
//! dropped from the table when the last holder or waiter goes away, so the
//! table only ever holds keys with a publish in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

/// Key of a publish lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub path: String,
    pub branch: String,
}

impl LockKey {
    pub fn new(path: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            branch: branch.into(),
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<LockKey, Slot>>,
}

/// Holds the lock for one key until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<LockKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits up to `timeout` for exclusive access to `key`.
    ///
    /// Returns `None` on timeout.
    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> Option<KeyGuard<'_>> {
        let slot = Arc::clone(self.slots().entry(key.clone()).or_default());

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Some(KeyGuard {
                owner: self,
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(&key);
                None
            }
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active(&self) -> usize {
        self.slots().len()
    }

    fn release_if_idle(&self, key: &LockKey) {
        let mut slots = self.slots();
        // Holders and waiters each own a clone; only the table's is left when idle.
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_if_idle(&self.key);
    }
}
