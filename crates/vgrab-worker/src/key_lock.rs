//! Per-key single-flight locking.
//!
//! At most one miss path runs per content key within this process. Later
//! callers for the same key wait on the lock and then find the winner's
//! cache entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use vgrab_models::ContentKey;

type LockMap = HashMap<ContentKey, Arc<AsyncMutex<()>>>;

/// One async mutex per content key; idle entries are pruned.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held lock for one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    key: ContentKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`.
    pub async fn acquire(&self, key: &ContentKey) -> KeyGuard {
        let lock = {
            let mut map = lock_map(&self.locks);
            map.entry(key.clone()).or_default().clone()
        };

        if lock.try_lock().is_err() {
            debug!(key = %key, "Waiting for in-flight run of the same key");
        }
        let guard = lock.lock_owned().await;

        KeyGuard {
            key: key.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut map = lock_map(&self.locks);
        // Only the map's own reference left: nobody holds or waits on it
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
