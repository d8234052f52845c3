//! Cache statistics.

use serde::Serialize;

use crate::config::EvictionPolicy;

/// A point-in-time snapshot of cache counters.
///
/// Counters are monotonically increasing for the lifetime of the cache and
/// never affect its behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Calls to `set`.
    pub writes: u64,
    /// Entries removed to respect capacity.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Current number of stored entries.
    pub size: usize,
    /// Capacity.
    pub max_size: usize,
    /// Eviction policy.
    pub policy: EvictionPolicy,
}

impl CacheStats {
    /// Fraction of reads that were hits, or 0 with no reads.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Current size as a percentage of capacity.
    #[must_use]
    pub fn utilization_percent(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.size as f64 / self.max_size as f64 * 100.0
    }
}
