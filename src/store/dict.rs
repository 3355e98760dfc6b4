//! Concurrent in-memory dictionary

use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Type alias for our hash map with SipHasher
type DictMap = HashMap<Bytes, Bytes, BuildHasherDefault<SipHasher13>>;

/// Thread-safe key/value map backing one logical database
///
/// Every method takes `&self`; a poisoned lock is recovered since each
/// operation leaves the map consistent.
pub struct Dict {
    map: RwLock<DictMap>,
}

impl Dict {
    /// Create a new dict with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Dict {
            map: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                BuildHasherDefault::<SipHasher13>::default(),
            )),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DictMap> {
        self.map.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DictMap> {
        self.map.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.read().get(key).cloned()
    }

    /// Insert or overwrite, returns 1 if the key is new
    pub fn put(&self, key: Bytes, value: Bytes) -> usize {
        match self.write().insert(key, value) {
            Some(_) => 0,
            None => 1,
        }
    }

    /// Insert only if absent, returns the number of keys inserted
    pub fn put_if_absent(&self, key: Bytes, value: Bytes) -> usize {
        let mut map = self.write();
        if map.contains_key(&key) {
            return 0;
        }
        map.insert(key, value);
        1
    }

    /// Overwrite only if present, returns the number of keys updated
    pub fn put_if_exists(&self, key: Bytes, value: Bytes) -> usize {
        match self.write().get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Store `value` under `key` and hand back the previous value
    pub fn swap(&self, key: Bytes, value: Bytes) -> Option<Bytes> {
        self.write().insert(key, value)
    }

    /// Remove a key, returns 1 if it existed
    pub fn remove(&self, key: &[u8]) -> usize {
        match self.write().remove(key) {
            Some(_) => 1,
            None => 0,
        }
    }

    /// Move the value at `src` to `dest`, overwriting `dest`
    ///
    /// With `only_if_absent`, nothing happens when `dest` exists. Returns
    /// `None` if `src` is missing, otherwise whether the move took place.
    pub fn rename(&self, src: &[u8], dest: Bytes, only_if_absent: bool) -> Option<bool> {
        let mut map = self.write();
        if !map.contains_key(src) {
            return None;
        }
        if only_if_absent && map.contains_key(&dest) {
            return Some(false);
        }
        let value = map.remove(src)?;
        map.insert(dest, value);
        Some(true)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all keys
    pub fn keys(&self) -> Vec<Bytes> {
        self.read().keys().cloned().collect()
    }

    /// Visit every entry until `consumer` returns false
    pub fn for_each<F>(&self, mut consumer: F)
    where
        F: FnMut(&Bytes, &Bytes) -> bool,
    {
        for (key, value) in self.read().iter() {
            if !consumer(key, value) {
                break;
            }
        }
    }

    /// Approximate bytes held by keys and values
    pub fn memory_usage(&self) -> usize {
        self.read().iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}
