use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::cache::{CacheEntry, CachedValue, Tier};

struct Slot {
    value: CachedValue,
    created_at: DateTime<Utc>,
    stored: Instant,
    ttl: Duration,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored) >= self.ttl
    }
}

/// Bounded in-process tier. Iteration order of the map is recency order:
/// the front is the least recently used entry.
pub struct MemoryTier {
    capacity: usize,
    ttl: Duration,
    slots: Mutex<IndexMap<String, Slot>>,
}

impl MemoryTier {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            slots: Mutex::new(IndexMap::with_capacity(capacity.min(4096))),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a live entry and marks it most recently used. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let slot = slots.shift_remove(key)?;
        if slot.is_expired(now) {
            return None;
        }
        let entry = CacheEntry {
            key: key.to_string(),
            value: slot.value.clone(),
            tier: Tier::Memory,
            created_at: slot.created_at,
            ttl: slot.ttl,
        };
        slots.insert(key.to_string(), slot);
        Some(entry)
    }

    pub fn put(&self, key: &str, value: CachedValue, created_at: DateTime<Utc>) {
        self.put_with_ttl(key, value, created_at, self.ttl);
    }

    /// Stores with `min(ttl, tier ttl)` so memory never outlives the tier window.
    pub fn put_with_ttl(
        &self,
        key: &str,
        value: CachedValue,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) {
        if self.capacity == 0 {
            return;
        }
        let slot = Slot {
            value,
            created_at,
            stored: Instant::now(),
            ttl: ttl.min(self.ttl),
        };
        let mut slots = self.slots.lock();
        slots.shift_remove(key);
        slots.insert(key.to_string(), slot);
        while slots.len() > self.capacity {
            slots.shift_remove_index(0);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.slots.lock().shift_remove(key).is_some()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(now));
        before - slots.len()
    }

    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let removed = slots.len();
        slots.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }
}
