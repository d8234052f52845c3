//! Cache configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Which entries to drop when the cache is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least recently used entries first.
    #[default]
    #[serde(rename = "LRU", alias = "lru")]
    Lru,
    /// Earliest inserted entries first, regardless of access.
    #[serde(rename = "FIFO", alias = "fifo")]
    Fifo,
}

impl EvictionPolicy {
    /// Returns the canonical name of the policy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "LRU",
            Self::Fifo => "FIFO",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LRU" => Ok(Self::Lru),
            "FIFO" => Ok(Self::Fifo),
            _ => Err(CacheError::UnknownPolicy {
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration for a [`BoundedCache`](crate::BoundedCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries. Values below 1 are treated as 1.
    pub max_entries: usize,
    /// Eviction policy, fixed for the cache's lifetime.
    pub eviction_policy: EvictionPolicy,
    /// TTL applied by `set_default` (in seconds).
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    /// Default maximum number of entries.
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;
    /// Default TTL (24 hours).
    pub const DEFAULT_TTL_SECS: u64 = 86_400;

    /// Creates a configuration with the default TTL.
    #[must_use]
    pub fn new(max_entries: usize, eviction_policy: EvictionPolicy) -> Self {
        Self {
            max_entries,
            eviction_policy,
            ..Default::default()
        }
    }

    /// Sets the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// The default TTL as a duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// The effective capacity, never below 1.
    #[must_use]
    pub fn effective_max_entries(&self) -> usize {
        self.max_entries.max(1)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::Lru,
            default_ttl_secs: Self::DEFAULT_TTL_SECS,
        }
    }
}
