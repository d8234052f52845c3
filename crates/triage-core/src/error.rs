//! Error types for the triage-core crate.

use thiserror::Error;

/// Errors that can occur while constructing or decoding core records.
///
/// Normalization and fingerprinting themselves are total and never produce
/// these errors; they only arise at construction and decoding boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    /// An error record failed validation.
    #[error("invalid error record: {reason}")]
    InvalidRecord {
        /// The reason the record is invalid.
        reason: String,
    },

    /// A fingerprint string was not 64 lowercase hex characters.
    #[error("invalid fingerprint: {reason}")]
    InvalidFingerprint {
        /// The reason the fingerprint is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, TriageError>;
