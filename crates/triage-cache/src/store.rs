//! Thread-safe bounded cache with per-entry expiry.
//!
//! This module provides [`BoundedCache`], an in-memory map whose entries
//! expire after a time-to-live and whose size is capped by evicting entries
//! according to an [`EvictionPolicy`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{CacheConfig, EvictionPolicy};
use crate::stats::CacheStats;

/// Cap on TTLs that would overflow the clock.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A stored value with its bookkeeping.
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Logical access clock value of the last read or write.
    last_access: u64,
    /// Position in insertion order; kept when the value is overwritten.
    insertion_order: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Table state guarded by a single lock.
#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    max_entries: usize,
    next_access: u64,
    next_insertion: u64,
}

impl<K, V> CacheState<K, V> {
    fn access_tick(&mut self) -> u64 {
        self.next_access += 1;
        self.next_access
    }

    fn insertion_tick(&mut self) -> u64 {
        self.next_insertion += 1;
        self.next_insertion
    }
}

/// An in-memory cache with TTL expiry and capacity-bounded eviction.
///
/// All operations are infallible: a full cache evicts rather than rejecting
/// writes, and an expired entry reads as absent. Eviction runs inside the
/// same critical section as the write that triggered it.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    policy: EvictionPolicy,
    default_ttl: Duration,
    state: Mutex<CacheState<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            policy: config.eviction_policy,
            default_ttl: config.default_ttl(),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                max_entries: config.effective_max_entries(),
                next_access: 0,
                next_insertion: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the given capacity and policy and the default TTL.
    #[must_use]
    pub fn with_capacity(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self::new(&CacheConfig::new(max_entries, policy))
    }

    /// Returns the value for `key` if present and not expired.
    ///
    /// An expired entry is removed on the way out. A hit refreshes the
    /// entry's recency.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let tick = state.access_tick();
        let value = state.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        });
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Returns true if a live entry exists, without touching its recency.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Stores `value` under `key` for `ttl`, evicting if over capacity.
    ///
    /// Overwriting refreshes value, expiry and recency but keeps the key's
    /// original insertion position.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now + ttl.min(MAX_TTL);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let tick = state.access_tick();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            entry.last_access = tick;
        } else {
            let insertion_order = state.insertion_tick();
            state.entries.insert(
                key,
                CacheEntry {
                    value,
                    expires_at,
                    last_access: tick,
                    insertion_order,
                },
            );
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.evict_overflow(state, now);
    }

    /// Stores `value` under `key` with the configured default TTL.
    pub fn set_default(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn delete(&self, key: &K) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();

        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        debug!(removed, size = state.entries.len(), "swept expired cache entries");

        removed
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Changes the capacity, clamped to at least 1, evicting immediately if
    /// the cache is now over it.
    pub fn set_max_size(&self, max_entries: usize) {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.max_entries = max_entries.max(1);
        self.evict_overflow(state, now);
    }

    /// Returns the capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.state.lock().max_entries
    }

    /// Returns the number of stored entries, including expired ones not yet
    /// swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns the eviction policy.
    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the TTL used by [`set_default`](Self::set_default).
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (size, max_size) = {
            let state = self.state.lock();
            (state.entries.len(), state.max_entries)
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size,
            max_size,
            policy: self.policy,
        }
    }

    /// Evicts exactly `len - max_entries` entries when over capacity.
    ///
    /// Expired entries go first, then entries in policy order. Sorting is
    /// stable and ties fall back to insertion order.
    fn evict_overflow(&self, state: &mut CacheState<K, V>, now: Instant) -> usize {
        let len = state.entries.len();
        if len <= state.max_entries {
            return 0;
        }
        let excess = len - state.max_entries;

        let mut ranked: Vec<(bool, u64, u64, &K)> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                let primary = match self.policy {
                    EvictionPolicy::Lru => entry.last_access,
                    EvictionPolicy::Fifo => entry.insertion_order,
                };
                (!entry.is_expired(now), primary, entry.insertion_order, key)
            })
            .collect();
        ranked.sort_by_key(|&(live, primary, order, _)| (live, primary, order));

        let victims: Vec<K> = ranked
            .into_iter()
            .take(excess)
            .map(|(_, _, _, key)| key.clone())
            .collect();

        for key in &victims {
            state.entries.remove(key);
        }

        self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
        debug!(
            evicted = victims.len(),
            size = state.entries.len(),
            max_size = state.max_entries,
            policy = %self.policy,
            "evicted cache entries"
        );

        victims.len()
    }
}
