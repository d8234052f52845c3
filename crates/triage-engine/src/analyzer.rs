//! Analysis backend abstraction.
//!
//! The engine never talks to a model or service directly; it goes through
//! the [`Analyzer`] trait. [`FakeAnalyzer`] is a scriptable implementation
//! for tests and local wiring.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use triage_core::{AnalysisResult, Fingerprint, NormalizedError};

use crate::error::{EngineError, Result};

/// Turns a normalized error into a diagnostic.
///
/// Implementations must be safe to call concurrently. Any failure is opaque
/// to the engine and is handed unchanged to every caller waiting on the same
/// key. Timeouts and retries belong to the implementation.
pub trait Analyzer: Send + Sync {
    /// Analyzes `error`, optionally enriched with repository `context`.
    fn analyze(
        &self,
        fingerprint: &Fingerprint,
        error: &NormalizedError,
        context: Option<&str>,
    ) -> impl Future<Output = Result<AnalysisResult>> + Send;
}

/// A recorded call to [`FakeAnalyzer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerCall {
    /// Fingerprint passed in.
    pub fingerprint: Fingerprint,
    /// Normalized message passed in.
    pub message: String,
    /// Enrichment context passed in.
    pub context: Option<String>,
}

#[derive(Debug, Default)]
struct FakeAnalyzerState {
    calls: AtomicUsize,
    history: Mutex<Vec<AnalyzerCall>>,
    failure: Mutex<Option<EngineError>>,
    fail_messages: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

/// A fake analyzer for testing.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another and still inspect the calls made.
#[derive(Debug, Clone, Default)]
pub struct FakeAnalyzer {
    state: Arc<FakeAnalyzerState>,
}

impl FakeAnalyzer {
    /// Creates a fake that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call sleep for `delay` before answering.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock() = Some(delay);
        self
    }

    /// Makes every call fail with `error`.
    #[must_use]
    pub fn failing(self, error: EngineError) -> Self {
        self.set_failure(Some(error));
        self
    }

    /// Sets or clears the failure returned by every call.
    pub fn set_failure(&self, error: Option<EngineError>) {
        *self.state.failure.lock() = error;
    }

    /// Makes calls whose normalized message contains `needle` fail.
    pub fn fail_when_message_contains(&self, needle: impl Into<String>) {
        self.state.fail_messages.lock().push(needle.into());
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<AnalyzerCall> {
        self.state.history.lock().clone()
    }

    fn scripted_failure(&self, message: &str) -> Option<EngineError> {
        if let Some(err) = self.state.failure.lock().clone() {
            return Some(err);
        }

        self.state
            .fail_messages
            .lock()
            .iter()
            .find(|needle| message.contains(needle.as_str()))
            .map(|needle| EngineError::analysis(format!("scripted failure for '{needle}'")))
    }
}

impl Analyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        fingerprint: &Fingerprint,
        error: &NormalizedError,
        context: Option<&str>,
    ) -> Result<AnalysisResult> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.history.lock().push(AnalyzerCall {
            fingerprint: *fingerprint,
            message: error.message.clone(),
            context: context.map(str::to_string),
        });

        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.scripted_failure(&error.message) {
            return Err(err);
        }

        let mut result = AnalysisResult::new(*fingerprint, format!("Analysis of: {}", error.message));
        if let Some(path) = &error.file_path {
            result = result.with_root_cause(format!("Failure originates in {path}"));
        }
        Ok(result)
    }
}
