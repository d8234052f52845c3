//! End-to-end integration tests for the analysis engine.
//!
//! Tests the request lifecycle across crates:
//! 1. Decoding a canonical event and deriving its cache key
//! 2. Single-flight deduplication under real parallelism
//! 3. Failure propagation to every waiter and ticket release
//! 4. Batch isolation and cache bypass
//! 5. Repository enrichment through a file-backed snippet provider

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use triage_cache::EvictionPolicy;
use triage_core::{ErrorEvent, ErrorRecord};
use triage_engine::{
    AnalysisEngine, EngineConfig, EngineError, FakeAnalyzer, FileSnippetProvider,
    InMemoryFileSource, ProcessingOptions,
};

const REPO: &str = "https://github.com/acme/checkout";

// ============================================================================
// Helper Functions
// ============================================================================

fn checkout_event(id: &str, order: u32) -> ErrorEvent {
    let record = ErrorRecord::builder(format!("Order {order} could not be charged: 'card_declined'"))
        .code("PAYMENT_FAILED")
        .file_path("/var/task/src/payments/charge.ts")
        .line_number(4)
        .stack_trace(format!(
            "Error: charge failed\n    at charge (/var/task/src/payments/charge.ts:4:{order})\n    at node:internal/process/task_queues:95:5"
        ))
        .context_entry("git.commit.sha", "9fceb02d0ae598e95dc970b74767f19372d61af8")
        .build()
        .unwrap();
    ErrorEvent::new(id, record).with_repository_url(REPO)
}

fn plain_event(id: &str, message: &str) -> ErrorEvent {
    ErrorEvent::new(id, ErrorRecord::new(message).unwrap())
}

fn engine(analyzer: &FakeAnalyzer) -> AnalysisEngine<FakeAnalyzer> {
    AnalysisEngine::new(analyzer.clone(), &EngineConfig::default())
}

// ============================================================================
// Single-Flight Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_identical_requests_analyze_once() {
    let analyzer = FakeAnalyzer::new().with_delay(Duration::from_millis(300));
    let engine = Arc::new(engine(&analyzer));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let event = plain_event(&format!("evt-{i}"), &format!("Worker {i} crashed"));
                engine.process(&event, &ProcessingOptions::new()).await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(analyzer.call_count(), 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn owner_failure_reaches_every_waiter() {
    let analyzer = FakeAnalyzer::new()
        .with_delay(Duration::from_millis(50))
        .failing(EngineError::analysis("model quota exhausted"));
    let engine = engine(&analyzer);
    let options = ProcessingOptions::new();
    let event = plain_event("evt", "Null pointer");

    let outcomes = join_all((0..4).map(|_| engine.process(&event, &options))).await;

    assert_eq!(analyzer.call_count(), 1);
    for outcome in outcomes {
        assert_eq!(outcome.unwrap_err(), EngineError::analysis("model quota exhausted"));
    }
}

#[tokio::test(start_paused = true)]
async fn ticket_released_after_failure_allows_new_owner() {
    let analyzer = FakeAnalyzer::new().failing(EngineError::analysis("transient"));
    let engine = engine(&analyzer);
    let event = plain_event("evt", "Null pointer");

    assert!(engine.process(&event, &ProcessingOptions::new()).await.is_err());
    assert_eq!(engine.in_flight(), 0);
    assert_eq!(engine.cache_stats().size, 0);

    analyzer.set_failure(None);
    let result = engine.process(&event, &ProcessingOptions::new()).await.unwrap();

    assert_eq!(analyzer.call_count(), 2);
    assert_eq!(result.fingerprint, *engine.cache_key_for(&event).fingerprint());
}

#[tokio::test(start_paused = true)]
async fn skip_cache_shares_flight_without_touching_cache() {
    let analyzer = FakeAnalyzer::new().with_delay(Duration::from_millis(50));
    let engine = engine(&analyzer);
    let options = ProcessingOptions::new().skip_cache();
    let event = plain_event("evt", "Deadlock detected");

    let outcomes = join_all((0..3).map(|_| engine.process(&event, &options))).await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(analyzer.call_count(), 1);

    let stats = engine.cache_stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.writes, 0);
    assert_eq!(stats.hits + stats.misses, 0);
}

// ============================================================================
// Batch Tests
// ============================================================================

#[tokio::test]
async fn batch_isolates_failed_event() {
    let analyzer = FakeAnalyzer::new();
    analyzer.fail_when_message_contains("Segfault");
    let engine = engine(&analyzer);

    let events = vec![
        plain_event("1", "Disk quota exceeded"),
        plain_event("2", "Segfault in worker"),
        plain_event("3", "Connection reset"),
    ];

    let results = engine.process_batch(&events, &ProcessingOptions::new()).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
    assert!(results[1].is_none());
    assert!(results[0].as_ref().unwrap().analysis.contains("Disk quota"));
    assert!(results[2].as_ref().unwrap().analysis.contains("Connection reset"));
}

// ============================================================================
// Configuration and Enrichment Tests
// ============================================================================

#[tokio::test]
async fn engine_built_from_environment() {
    let config = EngineConfig::from_env_vars([
        ("CACHE_MAX_SIZE", "2"),
        ("CACHE_EVICTION_POLICY", "FIFO"),
        ("DEFAULT_REPOSITORY_URL", REPO),
    ])
    .unwrap();
    assert_eq!(config.cache.eviction_policy, EvictionPolicy::Fifo);

    let analyzer = FakeAnalyzer::new();
    let engine = AnalysisEngine::new(analyzer.clone(), &config);

    for message in ["Alpha failed", "Beta failed", "Gamma failed"] {
        engine
            .process(&plain_event("evt", message), &ProcessingOptions::new())
            .await
            .unwrap();
    }

    let stats = engine.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.evictions, 1);
    assert!(
        engine
            .cache_key_for(&plain_event("evt", "Alpha failed"))
            .to_string()
            .starts_with(&format!("analysis:{REPO}:default:"))
    );
}

#[tokio::test]
async fn enrichment_uses_revision_and_skips_runtime_frames() {
    let source = InMemoryFileSource::new().with_file_at(
        REPO,
        "9fceb02d0ae598e95dc970b74767f19372d61af8",
        "src/payments/charge.ts",
        "import { gateway } from './gateway';\n\nexport async function charge(order) {\n  return gateway.charge(order.total);\n}\n",
    );
    let config = EngineConfig::default();
    let analyzer = FakeAnalyzer::new();
    let engine = AnalysisEngine::new(analyzer.clone(), &config)
        .with_code_context(FileSnippetProvider::new(source.clone(), &config.enrichment));

    let first = engine
        .process(&checkout_event("evt-1", 11), &ProcessingOptions::new())
        .await
        .unwrap();
    let second = engine
        .process(&checkout_event("evt-2", 12), &ProcessingOptions::new())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(analyzer.call_count(), 1);
    assert_eq!(source.fetch_count(), 1);

    let context = analyzer.calls()[0].context.clone().unwrap();
    assert!(context.starts_with(&format!(
        "Repository: {REPO}\nRef: 9fceb02d0ae598e95dc970b74767f19372d61af8"
    )));
    assert!(context.contains("[Snippet] src/payments/charge.ts:4\n```typescript\n"));
    assert!(context.contains("4 |   return gateway.charge(order.total);"));
    assert!(!context.contains("node:internal"));
}

#[tokio::test]
async fn decoded_json_event_is_processed() {
    let analyzer = FakeAnalyzer::new();
    let engine = engine(&analyzer);

    let json = serde_json::json!({
        "eventId": "evt-json",
        "timestamp": 1_700_000_000_000_i64,
        "errorLog": {
            "message": "Timeout after 3000 ms",
            "context": { "service": "billing", "region": "eu-west-1" }
        }
    })
    .to_string();

    let result = engine.process_json(&json, &ProcessingOptions::new()).await.unwrap();

    assert_eq!(result.analysis, "Analysis of: Timeout after N ms");
    assert_eq!(result.confidence_score, 75);
}
