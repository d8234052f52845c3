//! Error types for the triage-cache crate.
//!
//! Cache operations themselves never fail; these errors only arise when
//! parsing configuration.

use thiserror::Error;

/// Errors that can occur when configuring a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The eviction policy name was not recognized.
    #[error("unknown eviction policy: {value} (expected LRU or FIFO)")]
    UnknownPolicy {
        /// The rejected value.
        value: String,
    },
}

/// Result type for cache configuration.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unknown_policy() {
        let err = CacheError::UnknownPolicy {
            value: "MRU".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown eviction policy: MRU (expected LRU or FIFO)"
        );
    }
}
