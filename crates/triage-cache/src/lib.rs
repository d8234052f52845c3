//! # triage-cache
//!
//! Bounded, expiring, thread-safe key/value cache.
//!
//! This crate provides:
//!
//! - [`BoundedCache`]: In-memory cache with per-entry TTL and capacity-driven eviction
//! - [`EvictionPolicy`]: LRU or FIFO victim selection
//! - [`CacheConfig`]: Capacity, policy and default TTL
//! - [`CacheStats`]: Hit/miss/eviction counters
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use triage_cache::{BoundedCache, EvictionPolicy};
//!
//! let cache = BoundedCache::with_capacity(2, EvictionPolicy::Lru);
//! cache.set("a", 1, Duration::from_secs(60));
//! cache.set("b", 2, Duration::from_secs(60));
//!
//! // Touch "a" so "b" becomes the eviction victim.
//! assert_eq!(cache.get(&"a"), Some(1));
//! cache.set("c", 3, Duration::from_secs(60));
//!
//! assert!(cache.contains_key(&"a"));
//! assert!(!cache.contains_key(&"b"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod stats;
pub mod store;

// Re-export main types
pub use config::{CacheConfig, EvictionPolicy};
pub use error::{CacheError, Result};
pub use stats::CacheStats;
pub use store::BoundedCache;
