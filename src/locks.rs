use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{LedgerError, Result};

/// advisory mutex per key (student for generation, invoice for payments)
///
/// Entries live only while some [`LockSlot`] for the key is alive.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    slots: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// shared mutex for `key`; lock it for the span of the critical section
    pub fn slot(&self, key: &K) -> LockSlot<'_, K> {
        let handle = self.slots.entry(key.clone()).or_default().clone();
        LockSlot {
            locks: self,
            key: key.clone(),
            handle,
        }
    }

    /// slots for several keys in ascending key order, duplicates removed
    pub fn sorted_slots(&self, keys: impl IntoIterator<Item = K>) -> Vec<LockSlot<'_, K>>
    where
        K: Ord,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        keys.iter().map(|k| self.slot(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// one key's mutex; the table entry is dropped with the last slot
#[derive(Debug)]
pub struct LockSlot<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    handle: Arc<Mutex<()>>,
}

impl<'a, K: Eq + Hash + Clone + Display> LockSlot<'a, K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.handle
            .lock()
            .map_err(|_| LedgerError::lock_poisoned(&self.key))
    }
}

impl<'a, K: Eq + Hash + Clone> Drop for LockSlot<'a, K> {
    fn drop(&mut self) {
        // the table's reference plus this one; others clone under the same shard lock
        let handle = &self.handle;
        self.locks.slots.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, handle) && Arc::strong_count(current) <= 2
        });
    }
}

/// lock every slot in slice order
pub fn acquire_all<'s, K>(slots: &'s [LockSlot<'_, K>]) -> Result<Vec<MutexGuard<'s, ()>>>
where
    K: Eq + Hash + Clone + Display,
{
    slots.iter().map(|slot| slot.lock()).collect()
}
