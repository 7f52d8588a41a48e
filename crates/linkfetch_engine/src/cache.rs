use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use linkfetch_core::Payload;
use linkfetch_logging::{fetch_debug, fetch_info, fetch_warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::disk_tier::DiskTier;
use crate::memory_tier::MemoryTier;
use crate::target::normalize_key;
use crate::CacheSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Disk,
}

/// Value stored per key: the extracted result and the size of the page it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub payload: Payload,
    pub fetched_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Time left before the entry expires, measured from `now`.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let age = now
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.ttl.saturating_sub(age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub promotions: u64,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub disk_removed: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    promotions: AtomicU64,
}

/// Two-stage cache: a bounded in-process memory tier in front of an optional
/// persistent disk tier. Disk failures are logged and reported as misses.
pub struct CacheStore {
    memory: MemoryTier,
    disk: Option<DiskTier>,
    disk_ttl: Duration,
    counters: Counters,
}

impl CacheStore {
    pub fn new(settings: &CacheSettings) -> Self {
        let disk = settings.disk_dir.as_ref().and_then(|dir| {
            match DiskTier::open(dir.clone(), settings.disk_ttl) {
                Ok(tier) => Some(tier),
                Err(err) => {
                    fetch_warn!("Disk cache unavailable at {:?}, using memory only: {}", dir, err);
                    None
                }
            }
        });
        fetch_info!(
            "Cache initialized: memory {} entries ({}s TTL), disk {}",
            settings.memory_capacity,
            settings.memory_ttl.as_secs(),
            disk.as_ref()
                .map(|tier| format!("{:?} ({}s TTL)", tier.dir(), settings.disk_ttl.as_secs()))
                .unwrap_or_else(|| "disabled".to_string())
        );
        Self {
            memory: MemoryTier::new(settings.memory_capacity, settings.memory_ttl),
            disk,
            disk_ttl: settings.disk_ttl,
            counters: Counters::default(),
        }
    }

    pub fn memory_only(capacity: usize, ttl: Duration) -> Self {
        Self::new(&CacheSettings {
            memory_capacity: capacity,
            memory_ttl: ttl,
            disk_dir: None,
            ..CacheSettings::default()
        })
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Lifetime given to entries stored without an explicit TTL.
    pub fn disk_ttl(&self) -> Duration {
        self.disk_ttl
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    /// First stage: the memory tier only. Does not touch hit/miss counters.
    pub fn try_memory(&self, key: &str) -> Option<CacheEntry> {
        self.memory.get(key)
    }

    /// Second stage: the disk tier only. Read failures are a miss.
    pub fn try_disk(&self, key: &str) -> Option<CacheEntry> {
        let disk = self.disk.as_ref()?;
        match disk.get(key) {
            Ok(entry) => entry,
            Err(err) => {
                fetch_warn!("Disk cache read failed for {}: {}", key, err);
                None
            }
        }
    }

    /// Copies a disk entry into memory; it expires no later than the disk entry does.
    pub fn promote(&self, entry: &CacheEntry) {
        let remaining = entry.remaining_at(Utc::now());
        if remaining.is_zero() {
            return;
        }
        self.memory
            .put_with_ttl(&entry.key, entry.value.clone(), entry.created_at, remaining);
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Looks up a fetch target: memory, then disk with promotion.
    pub fn get(&self, target: &str) -> Option<CacheEntry> {
        self.lookup(&normalize_key(target))
    }

    /// Same as [`CacheStore::get`] for a key that is already normalized.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.try_memory(key) {
            fetch_debug!("Memory cache hit for {}", key);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }
        if let Some(entry) = self.try_disk(key) {
            fetch_debug!("Disk cache hit for {}", key);
            self.promote(&entry);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }
        fetch_debug!("Cache miss for {}", key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores under the default disk TTL.
    pub fn put(&self, target: &str, value: CachedValue) {
        self.put_with_ttl(target, value, self.disk_ttl);
    }

    pub fn put_with_ttl(&self, target: &str, value: CachedValue, ttl: Duration) {
        self.store(&normalize_key(target), value, ttl);
    }

    /// Same as [`CacheStore::put`] for a key that is already normalized.
    pub fn store(&self, key: &str, value: CachedValue, ttl: Duration) {
        let created_at = Utc::now();
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.put_with_ttl(key, &value, created_at, ttl) {
                fetch_warn!("Disk cache write failed for {}: {}", key, err);
            }
        }
        self.memory.put_with_ttl(key, value, created_at, ttl);
    }

    pub fn remove(&self, target: &str) {
        let key = normalize_key(target);
        self.memory.remove(&key);
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.remove(&key) {
                fetch_warn!("Disk cache remove failed for {}: {}", key, err);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let usage = self
            .disk
            .as_ref()
            .map(DiskTier::usage)
            .unwrap_or_default();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            disk_entries: usage.entries,
            disk_bytes: usage.bytes,
        }
    }

    pub fn sweep_expired(&self) -> SweepReport {
        let memory_removed = self.memory.sweep_expired();
        let disk_removed = match &self.disk {
            Some(disk) => disk.sweep_expired().unwrap_or_else(|err| {
                fetch_warn!("Disk cache sweep failed: {}", err);
                0
            }),
            None => 0,
        };
        if memory_removed + disk_removed > 0 {
            fetch_info!(
                "Cleaned up {} expired cache entries ({} memory, {} disk)",
                memory_removed + disk_removed,
                memory_removed,
                disk_removed
            );
        }
        SweepReport {
            memory_removed,
            disk_removed,
        }
    }

    pub fn clear(&self) -> SweepReport {
        let memory_removed = self.memory.clear();
        let disk_removed = match &self.disk {
            Some(disk) => disk.clear().unwrap_or_else(|err| {
                fetch_warn!("Disk cache clear failed: {}", err);
                0
            }),
            None => 0,
        };
        fetch_info!("Cleared {} cache entries", memory_removed + disk_removed);
        SweepReport {
            memory_removed,
            disk_removed,
        }
    }

    /// Runs [`CacheStore::sweep_expired`] every `interval` until `token` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep_expired();
                    }
                }
            }
        })
    }
}
