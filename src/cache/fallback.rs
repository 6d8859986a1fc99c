//! Bounded fallback cache.
//!
//! Filled from successful Closed-state reads and consulted only while the
//! read breaker is Open. Never authoritative: entries age out by TTL and are
//! not flushed when the breaker closes again.
//!
//! # Design Decisions
//! - Oldest-write-first eviction: a re-`put` moves the key to the back
//! - Expiry is lazy on `get`, plus a periodic `sweep`
//! - One `std::sync::Mutex`; no await happens while it is held

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::schema::FallbackCacheConfig;
use crate::observability::metrics::MetricsCollector;

/// One cached value.
#[derive(Debug, Clone)]
pub struct FallbackEntry {
    pub value: Vec<u8>,
    pub written_at: Instant,
    pub ttl: Duration,
    seq: u64,
}

impl FallbackEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.written_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, FallbackEntry>,
    // write sequence → key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<FallbackEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// Process-local, capacity-limited key/value cache.
#[derive(Debug)]
pub struct FallbackCache {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<CacheInner>,
    metrics: Arc<MetricsCollector>,
}

impl FallbackCache {
    pub fn new(capacity: usize, default_ttl: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            capacity,
            default_ttl,
            inner: Mutex::new(CacheInner::default()),
            metrics,
        }
    }

    pub fn from_config(config: &FallbackCacheConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self::new(config.capacity, config.ttl(), metrics)
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry. Expired entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        let now = Instant::now();

        let value = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        };
        let len = inner.entries.len();
        drop(inner);

        self.metrics.record_cache_lookup(value.is_some());
        self.metrics.record_cache_size(len);
        value
    }

    /// Insert or replace `key`, evicting the oldest writes past capacity.
    pub fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.remove(key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(
            key.to_string(),
            FallbackEntry {
                value,
                written_at: Instant::now(),
                ttl,
                seq,
            },
        );

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            self.metrics.record_cache_eviction();
        }
        self.metrics.record_cache_size(inner.entries.len());
    }

    /// `put` with the configured TTL.
    pub fn put_default(&self, key: &str, value: Vec<u8>) {
        self.put(key, value, self.default_ttl);
    }

    /// Drop `key` if present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.remove(key).is_some();
        self.metrics.record_cache_size(inner.entries.len());
        removed
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        self.metrics.record_cache_size(inner.entries.len());
        expired.len()
    }

    /// Entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
