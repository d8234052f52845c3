//! Analysis orchestration.
//!
//! [`AnalysisEngine`] ties the pieces together for each event:
//!
//! 1. Fingerprint the record and resolve its repository scope into a
//!    [`CacheKey`].
//! 2. Return a cached result if there is one.
//! 3. Claim the key. If another request already owns it, wait for that
//!    request's outcome.
//! 4. As owner, build the repository context, call the analyzer, cache a
//!    successful result, and publish the outcome to every waiter.
//!
//! The engine is meant to be constructed once and shared by reference (or
//! behind an `Arc`) across all requests for the life of the process.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};
use triage_cache::{BoundedCache, CacheStats};
use triage_core::{
    AnalysisResult, CacheKey, ErrorEvent, NormalizedError, RepositoryScope, hash_record,
};

use crate::analyzer::Analyzer;
use crate::code_context::{CodeContextProvider, NoCodeContext};
use crate::config::EngineConfig;
use crate::enrichment::{ContextBuilder, extract_repository_ref};
use crate::error::{EngineError, Result};
use crate::singleflight::{Claim, SingleFlight};

/// Per-request processing flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingOptions {
    /// Neither read nor write the result cache. The request still shares an
    /// in-flight analysis with concurrent requests for the same key.
    pub skip_cache: bool,
    /// TTL for the cached result instead of the configured default.
    pub cache_ttl: Option<Duration>,
}

impl ProcessingOptions {
    /// Default options: use the cache with its default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypasses the result cache.
    #[must_use]
    pub const fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    /// Overrides the TTL of the cached result.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Deduplicating, caching front end to an [`Analyzer`].
#[derive(Debug)]
pub struct AnalysisEngine<A, C = NoCodeContext> {
    analyzer: A,
    code_context: C,
    context_builder: ContextBuilder,
    cache: BoundedCache<CacheKey, AnalysisResult>,
    flights: SingleFlight<CacheKey, Result<AnalysisResult>>,
    default_repository_url: Option<String>,
}

impl<A: Analyzer> AnalysisEngine<A, NoCodeContext> {
    /// Creates an engine without repository access.
    ///
    /// Events with a repository still get a context header, but every
    /// snippet fetch is reported as unavailable. Use
    /// [`with_code_context`](Self::with_code_context) to attach a provider.
    pub fn new(analyzer: A, config: &EngineConfig) -> Self {
        Self {
            analyzer,
            code_context: NoCodeContext,
            context_builder: ContextBuilder::new(config.enrichment.clone()),
            cache: BoundedCache::new(&config.cache),
            flights: SingleFlight::new(),
            default_repository_url: config
                .default_repository_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        }
    }
}

impl<A, C> AnalysisEngine<A, C> {
    /// Replaces the code-context provider.
    pub fn with_code_context<P>(self, provider: P) -> AnalysisEngine<A, P> {
        AnalysisEngine {
            analyzer: self.analyzer,
            code_context: provider,
            context_builder: self.context_builder,
            cache: self.cache,
            flights: self.flights,
            default_repository_url: self.default_repository_url,
        }
    }

    /// The analyzer.
    pub const fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// The code-context provider.
    pub const fn code_context(&self) -> &C {
        &self.code_context
    }
}

impl<A: Analyzer, C: CodeContextProvider> AnalysisEngine<A, C> {
    /// Analyzes one event, sharing work with concurrent identical requests.
    ///
    /// Every caller for the same key while an analysis is running receives
    /// the owner's outcome, including its error unchanged. A failed analysis
    /// is never cached.
    pub async fn process(
        &self,
        event: &ErrorEvent,
        options: &ProcessingOptions,
    ) -> Result<AnalysisResult> {
        let (fingerprint, normalized) = hash_record(&event.record);
        let key = CacheKey::scoped(fingerprint, self.resolve_scope(event));

        if !options.skip_cache {
            if let Some(result) = self.cache.get(&key) {
                debug!(event_id = %event.event_id, key = %key, "analysis cache hit");
                return Ok(result);
            }
        }

        match self.flights.claim(key.clone()) {
            Claim::Waiter(ticket) => {
                debug!(event_id = %event.event_id, key = %key, "joining in-flight analysis");
                ticket.wait().await.unwrap_or_else(|| {
                    Err(EngineError::FlightAbandoned {
                        key: key.to_string(),
                    })
                })
            }
            Claim::Owner(guard) => {
                let outcome = self.analyze(event, &key, &normalized).await;

                if let Ok(result) = &outcome {
                    if !options.skip_cache {
                        let ttl = options.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
                        self.cache.set(key.clone(), result.clone(), ttl);
                    }
                }

                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Decodes a JSON event and analyzes it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidEvent`] if the JSON is not a valid
    /// event, or any error from [`process`](Self::process).
    pub async fn process_json(
        &self,
        json: &str,
        options: &ProcessingOptions,
    ) -> Result<AnalysisResult> {
        let event = ErrorEvent::from_json(json)?;
        self.process(&event, options).await
    }

    /// Analyzes a batch of events concurrently.
    ///
    /// The output has one slot per input, in input order. A failed event
    /// leaves its slot empty and does not affect the others. Identical
    /// events in the same batch share one analysis.
    pub async fn process_batch(
        &self,
        events: &[ErrorEvent],
        options: &ProcessingOptions,
    ) -> Vec<Option<AnalysisResult>> {
        let outcomes = join_all(events.iter().map(|event| self.process(event, options))).await;

        let results: Vec<Option<AnalysisResult>> = outcomes
            .into_iter()
            .zip(events)
            .enumerate()
            .map(|(index, (outcome, event))| match outcome {
                Ok(result) => Some(result),
                Err(err) => {
                    warn!(
                        index,
                        event_id = %event.event_id,
                        error = %err,
                        "batch event failed"
                    );
                    None
                }
            })
            .collect();

        info!(
            total = events.len(),
            failed = results.iter().filter(|r| r.is_none()).count(),
            "processed batch"
        );

        results
    }

    async fn analyze(
        &self,
        event: &ErrorEvent,
        key: &CacheKey,
        normalized: &NormalizedError,
    ) -> Result<AnalysisResult> {
        let context = match key.scope() {
            Some(scope) => Some(
                self.context_builder
                    .build(&self.code_context, scope, &event.record)
                    .await,
            ),
            None => None,
        };

        info!(
            event_id = %event.event_id,
            fingerprint = %key.fingerprint().short(),
            enriched = context.is_some(),
            "requesting analysis"
        );

        match self
            .analyzer
            .analyze(key.fingerprint(), normalized, context.as_deref())
            .await
        {
            Ok(result) => {
                info!(
                    event_id = %event.event_id,
                    fingerprint = %key.fingerprint().short(),
                    confidence = result.confidence_score,
                    "analysis complete"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(
                    event_id = %event.event_id,
                    fingerprint = %key.fingerprint().short(),
                    error = %err,
                    "analysis failed"
                );
                Err(err)
            }
        }
    }
}

impl<A, C> AnalysisEngine<A, C> {
    /// Returns the cache key an event would be processed under.
    pub fn cache_key_for(&self, event: &ErrorEvent) -> CacheKey {
        let (fingerprint, _) = hash_record(&event.record);
        CacheKey::scoped(fingerprint, self.resolve_scope(event))
    }

    /// Resolves the repository an event is analyzed against.
    ///
    /// The event's URL wins over the configured default. Without either
    /// there is no scope at all, and the revision is not consulted.
    pub fn resolve_scope(&self, event: &ErrorEvent) -> Option<RepositoryScope> {
        let url = event
            .repository_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .or(self.default_repository_url.as_deref())?;

        let scope = RepositoryScope::new(url);
        Some(match extract_repository_ref(event.record.context()) {
            Some(revision) => scope.with_revision(revision),
            None => scope,
        })
    }

    /// Result cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Removes expired results and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Removes the cached result for `key`. Returns true if one was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache.delete(key)
    }

    /// Looks up the cached result for `key`.
    pub fn cached(&self, key: &CacheKey) -> Option<AnalysisResult> {
        self.cache.get(key)
    }

    /// Number of analyses currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::FakeAnalyzer;
    use crate::code_context::{FileSnippetProvider, InMemoryFileSource};
    use triage_core::ErrorRecord;

    const REPO: &str = "https://github.com/acme/shop";
    const SLOW: Duration = Duration::from_millis(100);

    fn event(id: &str, message: &str) -> ErrorEvent {
        let record = ErrorRecord::builder(message)
            .code("E_RUNTIME")
            .file_path("/srv/deploy/src/cart.ts")
            .line_number(3)
            .build()
            .unwrap();
        ErrorEvent::new(id, record)
    }

    fn engine(analyzer: FakeAnalyzer) -> AnalysisEngine<FakeAnalyzer> {
        AnalysisEngine::new(analyzer, &EngineConfig::default())
    }

    mod cache_tests {
        use super::*;

        #[tokio::test]
        async fn second_call_hits_cache() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();

            let first = engine.process(&event("1", "Item 42 missing"), &options).await.unwrap();
            let second = engine.process(&event("2", "Item 7 missing"), &options).await.unwrap();

            assert_eq!(first, second);
            assert_eq!(analyzer.call_count(), 1);
            assert_eq!(engine.cache_stats().hits, 1);
        }

        #[tokio::test]
        async fn failure_not_cached() {
            let analyzer = FakeAnalyzer::new().failing(EngineError::analysis("down"));
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();

            assert!(engine.process(&event("1", "boom"), &options).await.is_err());
            analyzer.set_failure(None);
            assert!(engine.process(&event("2", "boom"), &options).await.is_ok());

            assert_eq!(analyzer.call_count(), 2);
        }

        #[tokio::test]
        async fn skip_cache_neither_reads_nor_writes() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());
            let e = event("1", "boom");

            engine.process(&e, &ProcessingOptions::new()).await.unwrap();
            engine.invalidate(&engine.cache_key_for(&e));

            engine.process(&e, &ProcessingOptions::new().skip_cache()).await.unwrap();
            assert_eq!(engine.cache_stats().size, 0);

            engine.process(&e, &ProcessingOptions::new()).await.unwrap();
            engine.process(&e, &ProcessingOptions::new().skip_cache()).await.unwrap();

            assert_eq!(analyzer.call_count(), 4);
            assert_eq!(engine.cache_stats().size, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn cache_ttl_override() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());
            let e = event("1", "boom");
            let options = ProcessingOptions::new().with_cache_ttl(Duration::from_secs(10));

            engine.process(&e, &options).await.unwrap();
            tokio::time::advance(Duration::from_secs(5)).await;
            engine.process(&e, &options).await.unwrap();
            assert_eq!(analyzer.call_count(), 1);

            tokio::time::advance(Duration::from_secs(6)).await;
            assert_eq!(engine.sweep_expired(), 1);
            engine.process(&e, &options).await.unwrap();
            assert_eq!(analyzer.call_count(), 2);
        }

        #[tokio::test]
        async fn invalidate_forces_reanalysis() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());
            let e = event("1", "boom");

            engine.process(&e, &ProcessingOptions::new()).await.unwrap();
            let key = engine.cache_key_for(&e);
            assert!(engine.cached(&key).is_some());
            assert!(engine.invalidate(&key));
            assert!(!engine.invalidate(&key));

            engine.process(&e, &ProcessingOptions::new()).await.unwrap();
            assert_eq!(analyzer.call_count(), 2);
        }
    }

    mod scope_tests {
        use super::*;

        #[test]
        fn unscoped_without_repository() {
            let engine = engine(FakeAnalyzer::new());
            let key = engine.cache_key_for(&event("1", "boom"));
            assert!(key.scope().is_none());
            assert!(key.to_string().starts_with("analysis:"));
            assert_eq!(key.to_string().len(), "analysis:".len() + 64);
        }

        #[test]
        fn default_repository_applies() {
            let config = EngineConfig {
                default_repository_url: Some(REPO.to_string()),
                ..EngineConfig::default()
            };
            let engine = AnalysisEngine::new(FakeAnalyzer::new(), &config);

            let scope = engine.resolve_scope(&event("1", "boom")).unwrap();

            assert_eq!(scope, RepositoryScope::new(REPO));
        }

        #[test]
        fn event_repository_wins() {
            let config = EngineConfig {
                default_repository_url: Some(REPO.to_string()),
                ..EngineConfig::default()
            };
            let engine = AnalysisEngine::new(FakeAnalyzer::new(), &config);
            let e = event("1", "boom").with_repository_url(" https://github.com/acme/api ");

            let scope = engine.resolve_scope(&e).unwrap();

            assert_eq!(scope.url, "https://github.com/acme/api");
        }

        #[test]
        fn blank_repository_is_absent() {
            let engine = engine(FakeAnalyzer::new());
            let e = event("1", "boom").with_repository_url("   ");
            assert!(engine.resolve_scope(&e).is_none());
        }

        #[test]
        fn revision_from_context() {
            let engine = engine(FakeAnalyzer::new());
            let record = ErrorRecord::builder("boom")
                .context_entry("git.commit.sha", "a1b2c3d4e5f6")
                .build()
                .unwrap();
            let e = ErrorEvent::new("1", record).with_repository_url(REPO);

            let key = engine.cache_key_for(&e);

            assert_eq!(
                key.to_string(),
                format!("analysis:{REPO}:a1b2c3d4e5f6:{}", key.fingerprint())
            );
        }

        #[tokio::test]
        async fn different_repositories_do_not_collide() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();

            engine
                .process(&event("1", "boom").with_repository_url(REPO), &options)
                .await
                .unwrap();
            engine
                .process(
                    &event("2", "boom").with_repository_url("https://github.com/acme/api"),
                    &options,
                )
                .await
                .unwrap();

            assert_eq!(analyzer.call_count(), 2);
        }
    }

    mod flight_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn concurrent_identical_requests_share_one_call() {
            let analyzer = FakeAnalyzer::new().with_delay(SLOW);
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();
            let a = event("1", "Order 1 failed");
            let b = event("2", "Order 2 failed");

            let (first, second) =
                tokio::join!(engine.process(&a, &options), engine.process(&b, &options));

            assert_eq!(first.unwrap(), second.unwrap());
            assert_eq!(analyzer.call_count(), 1);
            assert_eq!(engine.in_flight(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn waiters_receive_owner_failure() {
            let analyzer = FakeAnalyzer::new()
                .with_delay(SLOW)
                .failing(EngineError::analysis("quota exceeded"));
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();
            let e = event("1", "boom");

            let (first, second, third) = tokio::join!(
                engine.process(&e, &options),
                engine.process(&e, &options),
                engine.process(&e, &options),
            );

            let expected = EngineError::analysis("quota exceeded");
            assert_eq!(first.unwrap_err(), expected);
            assert_eq!(second.unwrap_err(), expected);
            assert_eq!(third.unwrap_err(), expected);
            assert_eq!(analyzer.call_count(), 1);
            assert_eq!(engine.in_flight(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn skip_cache_still_shares_flight() {
            let analyzer = FakeAnalyzer::new().with_delay(SLOW);
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new().skip_cache();
            let e = event("1", "boom");

            let (first, second) =
                tokio::join!(engine.process(&e, &options), engine.process(&e, &options));

            assert!(first.is_ok() && second.is_ok());
            assert_eq!(analyzer.call_count(), 1);
            assert_eq!(engine.cache_stats().size, 0);
        }

        #[tokio::test(start_paused = true)]
        async fn abandoned_owner_releases_waiters() {
            let analyzer = FakeAnalyzer::new().with_delay(Duration::from_secs(60));
            let engine = engine(analyzer.clone());
            let options = ProcessingOptions::new();
            let e = event("1", "boom");

            let (owner, waiter) = tokio::join!(
                tokio::time::timeout(Duration::from_secs(1), engine.process(&e, &options)),
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    engine.process(&e, &options).await
                },
            );

            assert!(owner.is_err());
            assert!(matches!(waiter, Err(EngineError::FlightAbandoned { .. })));
            assert_eq!(engine.in_flight(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn new_owner_after_release() {
            let analyzer = FakeAnalyzer::new()
                .with_delay(SLOW)
                .failing(EngineError::analysis("flaky"));
            let engine = engine(analyzer.clone());
            let e = event("1", "boom");

            assert!(engine.process(&e, &ProcessingOptions::new()).await.is_err());
            analyzer.set_failure(None);
            assert!(engine.process(&e, &ProcessingOptions::new()).await.is_ok());

            assert_eq!(analyzer.call_count(), 2);
        }
    }

    mod batch_tests {
        use super::*;

        #[tokio::test]
        async fn failed_slot_is_none() {
            let analyzer = FakeAnalyzer::new();
            analyzer.fail_when_message_contains("poison");
            let engine = engine(analyzer.clone());

            let events = vec![
                event("1", "first"),
                event("2", "poison pill"),
                event("3", "third"),
            ];
            let results = engine.process_batch(&events, &ProcessingOptions::new()).await;

            assert_eq!(results.len(), 3);
            assert!(results[0].is_some());
            assert!(results[1].is_none());
            assert!(results[2].is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn duplicates_in_batch_share_flight() {
            let analyzer = FakeAnalyzer::new().with_delay(SLOW);
            let engine = engine(analyzer.clone());

            let events = vec![event("1", "Row 1 locked"), event("2", "Row 2 locked")];
            let results = engine.process_batch(&events, &ProcessingOptions::new()).await;

            assert!(results.iter().all(Option::is_some));
            assert_eq!(analyzer.call_count(), 1);
        }

        #[tokio::test]
        async fn empty_batch() {
            let engine = engine(FakeAnalyzer::new());
            let results = engine.process_batch(&[], &ProcessingOptions::new()).await;
            assert!(results.is_empty());
        }
    }

    mod enrichment_tests {
        use super::*;

        #[tokio::test]
        async fn no_context_without_repository() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());

            engine
                .process(&event("1", "boom"), &ProcessingOptions::new())
                .await
                .unwrap();

            assert_eq!(analyzer.calls()[0].context, None);
        }

        #[tokio::test]
        async fn snippet_passed_to_analyzer() {
            let analyzer = FakeAnalyzer::new();
            let config = EngineConfig::default();
            let source = InMemoryFileSource::new().with_file(
                REPO,
                "src/cart.ts",
                "const a = 1;\nconst b = 2;\nthrow new Error();",
            );
            let engine = AnalysisEngine::new(analyzer.clone(), &config)
                .with_code_context(FileSnippetProvider::new(source, &config.enrichment));

            engine
                .process(&event("1", "boom").with_repository_url(REPO), &ProcessingOptions::new())
                .await
                .unwrap();

            let context = analyzer.calls()[0].context.clone().unwrap();
            assert!(context.starts_with(&format!("Repository: {REPO}\nRef: default")));
            assert!(context.contains("[Snippet] src/cart.ts:3\n```typescript\n"));
            assert!(context.contains("3 | throw new Error();"));
        }

        #[tokio::test]
        async fn fetch_failure_does_not_abort() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());

            let result = engine
                .process(&event("1", "boom").with_repository_url(REPO), &ProcessingOptions::new())
                .await;

            assert!(result.is_ok());
            let context = analyzer.calls()[0].context.clone().unwrap();
            assert!(context.contains("Failed to fetch code"));
        }
    }

    mod json_tests {
        use super::*;

        #[tokio::test]
        async fn processes_json_event() {
            let analyzer = FakeAnalyzer::new();
            let engine = engine(analyzer.clone());

            let json = r#"{
                "eventId": "evt-1",
                "timestamp": 1700000000000,
                "errorLog": { "message": "Connection refused on port 5432" }
            }"#;

            let result = engine.process_json(json, &ProcessingOptions::new()).await.unwrap();

            assert_eq!(result.analysis, "Analysis of: Connection refused on port N");
        }

        #[tokio::test]
        async fn rejects_invalid_json() {
            let engine = engine(FakeAnalyzer::new());

            let err = engine
                .process_json(r#"{"eventId": "x", "errorLog": {"message": ""}}"#, &ProcessingOptions::new())
                .await
                .unwrap_err();

            assert!(matches!(err, EngineError::InvalidEvent(_)));
        }
    }
}
