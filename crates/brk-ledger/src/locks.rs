//! Per-position async mutex arena.
//!
//! Every mutation that can touch the lot set of a `(client, symbol,
//! exchange)` holds that key's mutex for the whole unit of work. Keys that
//! differ never contend. Multi-key acquisition is done in sorted order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::PositionKey;

#[derive(Clone, Debug, Default)]
pub struct KeyedLocks {
    slots: Arc<StdMutex<HashMap<PositionKey, Arc<Mutex<()>>>>>,
}

/// Held for the duration of a mutation; released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &PositionKey) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    pub async fn acquire(&self, key: &PositionKey) -> KeyGuard {
        let guard = self.slot(key).lock_owned().await;
        KeyGuard {
            _guards: vec![guard],
        }
    }

    /// Lock several keys. Duplicates are collapsed.
    pub async fn acquire_many<I>(&self, keys: I) -> KeyGuard
    where
        I: IntoIterator<Item = PositionKey>,
    {
        let mut keys: Vec<PositionKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.slot(key).lock_owned().await);
        }
        KeyGuard { _guards: guards }
    }

    /// Drop slots nobody holds or waits on.
    pub fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
