use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use huginn::{
    CancellationToken, DataSource, Engine, EngineConfig, HuginnError, LoadRequest, LoadResult,
    Phase, Result, RetryPolicy,
};

/// Mock source that fails N times then succeeds.
struct FailThenSucceed {
    fail_count: AtomicU32,
    total_calls: AtomicU32,
}

impl FailThenSucceed {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_count: AtomicU32::new(failures),
            total_calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSource<u32> for FailThenSucceed {
    fn name(&self) -> &str {
        "mock-retry"
    }

    async fn fetch(
        &self,
        request: &LoadRequest,
        _cancel: &CancellationToken,
    ) -> Result<LoadResult<u32>> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err(HuginnError::Timeout(Duration::from_secs(30)));
        }
        let data = (request.offset as u32..(request.offset + request.limit) as u32).collect();
        Ok(LoadResult::page(data, request.offset, 1_000))
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

#[test]
fn policy_defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 3);
    assert_eq!(policy.retry_delay, Duration::from_millis(1_000));
    assert_eq!(EngineConfig::default().retry_policy(), policy);
}

#[test]
fn policy_delay_doubles() {
    let policy = RetryPolicy::new().retry_delay(Duration::from_millis(100));
    assert_eq!(policy.delay(0), Duration::from_millis(100));
    assert_eq!(policy.delay(1), Duration::from_millis(200));
    assert_eq!(policy.delay(2), Duration::from_millis(400));
    assert_eq!(
        policy.delay(40),
        Duration::from_millis(100).saturating_mul(u32::MAX)
    );
}

#[test]
fn disabled_policy_allows_nothing() {
    assert!(!RetryPolicy::disabled().allows(0));
}

// ============================================================================
// Engine backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn backoff_grows_exponentially() {
    let source = FailThenSucceed::new(3);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(engine.phase(), Phase::Failed);

    for expected in [1_000, 2_000, 4_000] {
        let started = Instant::now();
        engine.retry().await;
        let waited = started.elapsed();
        assert!(
            waited >= Duration::from_millis(expected)
                && waited < Duration::from_millis(expected + 10),
            "expected ~{expected}ms, waited {waited:?}"
        );
    }
    assert_eq!(source.call_count(), 4);

    let state = engine.state();
    assert!(state.error.is_none());
    assert_eq!(state.items.len(), 30);
    assert_eq!(state.retry_count, 3);
}

#[tokio::test(start_paused = true)]
async fn successful_load_resets_retry_count() {
    let source = FailThenSucceed::new(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    engine.retry().await;
    assert_eq!(engine.state().retry_count, 1);

    engine.load_more().await;
    assert_eq!(engine.state().retry_count, 0);
    assert_eq!(engine.state().items.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn retry_without_error_reloads_first_page_when_empty() {
    let source = FailThenSucceed::new(0);
    let engine = Engine::builder()
        .source(source.clone())
        .retry_delay(Duration::from_millis(50))
        .build()
        .unwrap();

    let started = Instant::now();
    engine.retry().await;

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(source.call_count(), 1);
    assert_eq!(engine.state().items.len(), 30);
}

#[tokio::test(start_paused = true)]
async fn phase_is_retrying_during_backoff() {
    let source = FailThenSucceed::new(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.retry().await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.phase(), Phase::Retrying);
    assert_eq!(engine.state().retry_count, 1);

    task.await.unwrap();
    assert_eq!(engine.phase(), Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_backoff() {
    let source = FailThenSucceed::new(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.retry().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.shutdown();
    task.await.unwrap();

    assert_eq!(source.call_count(), 1);
}
