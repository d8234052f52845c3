//! # triage-core
//!
//! Error record model and fingerprinting for the triage engine.
//!
//! This crate provides:
//!
//! - [`ErrorRecord`]: An immutable reported error with optional location and context
//! - [`ErrorEvent`]: The canonical envelope adapters hand to the engine
//! - [`NormalizedError`]: A record with volatile details replaced by placeholders
//! - [`Fingerprint`]: SHA-256 identity shared by semantically equivalent errors
//! - [`CacheKey`]: Fingerprint plus optional repository/revision scope
//! - [`AnalysisResult`]: The diagnostic produced for a unique error
//!
//! ## Example
//!
//! ```rust
//! use triage_core::{ErrorRecord, hash_record};
//!
//! let first = ErrorRecord::builder("Cannot read property 'id' of undefined")
//!     .file_path("/home/ci/build/src/user.ts")
//!     .stack_trace("at getUser (src/user.ts:45:15)")
//!     .build()
//!     .unwrap();
//!
//! let second = ErrorRecord::builder("Cannot read property 'email' of undefined")
//!     .file_path("C:\\work\\src\\user.ts")
//!     .stack_trace("at getUser (src/user.ts:51:3)")
//!     .build()
//!     .unwrap();
//!
//! let (a, normalized) = hash_record(&first);
//! let (b, _) = hash_record(&second);
//! assert_eq!(a, b);
//! assert_eq!(normalized.file_path.as_deref(), Some("src/user.ts"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fingerprint;
pub mod types;

// Re-export main types
pub use error::{Result, TriageError};
pub use fingerprint::{
    canonical_context, fingerprint, hash_record, normalize, normalize_message, normalize_path,
    normalize_stack_trace, SOURCE_ROOTS,
};
pub use types::{
    AnalysisResult, CacheKey, ErrorContext, ErrorEvent, ErrorRecord, ErrorRecordBuilder,
    Fingerprint, NormalizedError, RepositoryScope,
};
