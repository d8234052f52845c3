//! Error types for the triage-engine crate.

use std::fmt;

use thiserror::Error;
use triage_cache::CacheError;
use triage_core::TriageError;

/// Errors that can occur while analyzing an error event.
///
/// The type is `Clone` so that the single failure produced by a flight owner
/// can be handed unchanged to every waiter on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The analyzer failed to produce a result.
    #[error("analysis failed: {reason}")]
    AnalysisFailed {
        /// The analyzer's description of the failure.
        reason: String,
    },

    /// Source code could not be fetched for enrichment.
    #[error("code context unavailable: {reason}")]
    CodeContext {
        /// The provider's description of the failure.
        reason: String,
    },

    /// The owner of an in-flight analysis went away before publishing.
    #[error("in-flight analysis for {key} was abandoned by its owner")]
    FlightAbandoned {
        /// Display form of the cache key.
        key: String,
    },

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An event or record could not be decoded.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl EngineError {
    /// Builds an [`EngineError::AnalysisFailed`] from any displayable reason.
    pub fn analysis(reason: impl fmt::Display) -> Self {
        Self::AnalysisFailed {
            reason: reason.to_string(),
        }
    }

    /// Builds an [`EngineError::CodeContext`] from any displayable reason.
    pub fn code_context(reason: impl fmt::Display) -> Self {
        Self::CodeContext {
            reason: reason.to_string(),
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<TriageError> for EngineError {
    fn from(err: TriageError) -> Self {
        Self::InvalidEvent(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
