//! # triage-engine
//!
//! Cached, deduplicated analysis of error events.
//!
//! This crate provides:
//!
//! - [`AnalysisEngine`]: Cache lookup, single-flight arbitration, enrichment and analysis
//! - [`SingleFlight`]: Collapses concurrent work for the same key into one execution
//! - [`Analyzer`]: The analysis backend seam, with [`FakeAnalyzer`] for tests
//! - [`CodeContextProvider`]: Source snippet lookup, with [`FileSnippetProvider`]
//! - [`ContextBuilder`]: Renders repository context from stack frames
//! - [`EngineConfig`]: TOML/environment configuration
//!
//! ## Example
//!
//! ```rust
//! use triage_core::{ErrorEvent, ErrorRecord};
//! use triage_engine::{AnalysisEngine, EngineConfig, FakeAnalyzer, ProcessingOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let analyzer = FakeAnalyzer::new();
//! let engine = AnalysisEngine::new(analyzer.clone(), &EngineConfig::default());
//!
//! let record = ErrorRecord::new("User 42 not found").unwrap();
//! let first = ErrorEvent::new("evt-1", record);
//! let record = ErrorRecord::new("User 7 not found").unwrap();
//! let second = ErrorEvent::new("evt-2", record);
//!
//! let options = ProcessingOptions::new();
//! let a = engine.process(&first, &options).await.unwrap();
//! let b = engine.process(&second, &options).await.unwrap();
//!
//! assert_eq!(a, b);
//! assert_eq!(analyzer.call_count(), 1);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analyzer;
pub mod code_context;
pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod singleflight;

// Re-export main types
pub use analyzer::{Analyzer, AnalyzerCall, FakeAnalyzer};
pub use code_context::{
    CodeContextProvider, FileSnippetProvider, InMemoryFileSource, NoCodeContext,
    RepositoryFileSource, extract_snippet,
};
pub use config::{EngineConfig, EnrichmentConfig};
pub use engine::{AnalysisEngine, ProcessingOptions};
pub use enrichment::{
    CodeLocation, ContextBuilder, extract_code_locations, extract_repository_ref, guess_language,
};
pub use error::{EngineError, Result};
pub use singleflight::{Claim, OwnerGuard, SingleFlight, Ticket};
