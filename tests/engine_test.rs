//! Engine behaviour against a scripted data source.
//!
//! Time is paused in most tests so latencies and backoff delays are
//! deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use huginn::{
    CancellationToken, DataSource, Engine, HuginnError, LoadRequest, LoadResult, Phase, Query,
    ResponseCache, Result,
};

// ============================================================================
// Mock source
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Row {
    id: usize,
    search: String,
}

/// Serves ids `offset + 1 ..= offset + limit` out of `total`, tagged with
/// the request's search string.
struct MockSource {
    total: usize,
    delays: Mutex<VecDeque<Duration>>,
    failures: AtomicU32,
    calls: Mutex<Vec<LoadRequest>>,
}

impl MockSource {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            delays: Mutex::new(VecDeque::new()),
            failures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Latencies for the next calls, in call order.
    fn delay_next(&self, delays: &[u64]) {
        let mut queue = self.delays.lock().unwrap();
        queue.extend(delays.iter().map(|ms| Duration::from_millis(*ms)));
    }

    fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<LoadRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DataSource<Row> for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        request: &LoadRequest,
        _cancel: &CancellationToken,
    ) -> Result<LoadResult<Row>> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(HuginnError::Api {
                status: 500,
                message: "backend unavailable".into(),
            });
        }

        let end = (request.offset + request.limit).min(self.total);
        let data: Vec<Row> = (request.offset..end)
            .map(|i| Row {
                id: i + 1,
                search: request.search.clone(),
            })
            .collect();
        Ok(LoadResult::page(data, request.offset, self.total))
    }
}

fn ids(engine: &Engine<Row>) -> Vec<usize> {
    engine.state().items.iter().map(|r| r.id).collect()
}

// ============================================================================
// Initial load and load-more
// ============================================================================

#[tokio::test]
async fn initial_load_with_defaults() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    let state = engine.state();
    assert_eq!(state.items.len(), 30);
    assert_eq!(state.items[0].id, 1);
    assert_eq!(state.items[29].id, 30);
    assert_eq!(state.total_count, 100);
    assert!(state.has_more);
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert_eq!(state.phase, Phase::Ready);

    let calls = source.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].offset, 0);
    assert_eq!(calls[0].limit, 30);
}

#[tokio::test]
async fn load_more_requests_next_page() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    engine.load_more().await;

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[1].offset, calls[1].limit), (30, 20));
    assert_eq!(ids(&engine), (1..=50).collect::<Vec<_>>());
    assert_eq!(engine.phase(), Phase::Ready);
}

#[tokio::test]
async fn eviction_keeps_newest_items() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .max_items_in_memory(Some(40))
        .start()
        .await
        .unwrap();

    engine.load_more().await;

    let state = engine.state();
    assert_eq!(state.items.len(), 40);
    assert_eq!(ids(&engine), (11..=50).collect::<Vec<_>>());
    assert_eq!(state.window_start, 10);

    // The next page continues after the last item held, not after
    // items.len().
    engine.load_more().await;
    assert_eq!(source.calls()[2].offset, 50);
    assert_eq!(ids(&engine), (31..=70).collect::<Vec<_>>());
}

#[tokio::test]
async fn unbounded_buffer_never_evicts() {
    let source = MockSource::new(200);
    let engine = Engine::builder()
        .source(source.clone())
        .max_items_in_memory(None)
        .load_more_size(50)
        .start()
        .await
        .unwrap();

    for _ in 0..4 {
        engine.load_more().await;
    }

    let state = engine.state();
    assert_eq!(state.items.len(), 200);
    assert_eq!(state.window_start, 0);
    assert!(!state.has_more);
}

#[tokio::test]
async fn load_more_is_noop_without_more() {
    let source = MockSource::new(25);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();
    assert!(!engine.state().has_more);

    engine.load_more().await;

    assert_eq!(source.call_count(), 1);
    assert_eq!(engine.state().items.len(), 25);
}

#[tokio::test]
async fn load_more_is_noop_while_error_set() {
    let source = MockSource::new(100);
    source.fail_next(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();
    assert!(engine.state().error.is_some());
    assert_eq!(engine.phase(), Phase::Failed);

    engine.load_more().await;

    assert_eq!(source.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_load_more_is_single_flight() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    source.delay_next(&[100, 100]);
    tokio::join!(engine.load_more(), engine.load_more());

    assert_eq!(source.call_count(), 2);
    assert_eq!(engine.state().items.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn start_dropped_while_fetch_in_flight() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .build()
        .unwrap();

    source.delay_next(&[100]);
    tokio::join!(engine.start(), engine.start());

    assert_eq!(source.call_count(), 1);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn retry_after_failed_initial_load() {
    let source = MockSource::new(100);
    source.fail_next(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();
    assert!(matches!(
        engine.state().error,
        Some(HuginnError::Api { status: 500, .. })
    ));

    let started = Instant::now();
    engine.retry().await;
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(1_000), "waited {waited:?}");
    assert!(waited < Duration::from_millis(1_100), "waited {waited:?}");

    let state = engine.state();
    assert_eq!(state.items.len(), 30);
    assert!(state.error.is_none());
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.phase, Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn retry_repeats_failed_load_more() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    source.fail_next(1);
    engine.load_more().await;
    assert!(engine.state().error.is_some());
    assert_eq!(engine.state().items.len(), 30);

    engine.retry().await;

    let calls = source.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].offset, 30);
    assert_eq!(engine.state().items.len(), 50);
    assert!(engine.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn retry_ignored_past_ceiling() {
    let source = MockSource::new(100);
    source.fail_next(u32::MAX);
    let engine = Engine::builder()
        .source(source.clone())
        .max_retries(2)
        .retry_delay(Duration::from_millis(10))
        .start()
        .await
        .unwrap();

    engine.retry().await;
    engine.retry().await;
    assert_eq!(engine.state().retry_count, 2);
    assert_eq!(source.call_count(), 3);

    let started = Instant::now();
    engine.retry().await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(source.call_count(), 3);
    assert_eq!(engine.state().retry_count, 2);
    assert_eq!(engine.phase(), Phase::Failed);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_retry() {
    let source = MockSource::new(100);
    source.fail_next(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    let retrying = tokio::spawn({
        let engine = engine.clone();
        async move { engine.retry().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.phase(), Phase::Retrying);

    engine.reset();
    retrying.await.unwrap();

    assert_eq!(source.call_count(), 1);
    assert_eq!(engine.state(), Default::default());
}

#[tokio::test(start_paused = true)]
async fn refresh_cancels_pending_retry() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();
    source.fail_next(1);
    engine.load_more().await;
    assert_eq!(engine.phase(), Phase::Failed);

    let retrying = tokio::spawn({
        let engine = engine.clone();
        async move { engine.retry().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.phase(), Phase::Retrying);

    engine.refresh().await;
    assert_eq!(source.call_count(), 3);
    retrying.await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let state = engine.state();
    assert_eq!(source.call_count(), 3);
    assert_eq!(ids(&engine), (1..=30).collect::<Vec<_>>());
    assert!(state.error.is_none());
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.phase, Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn start_during_backoff_drops_retry() {
    let source = MockSource::new(100);
    source.fail_next(1);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    let retrying = tokio::spawn({
        let engine = engine.clone();
        async move { engine.retry().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.start().await;
    assert_eq!(engine.state().items.len(), 30);

    retrying.await.unwrap();

    assert_eq!(source.call_count(), 2);
    assert_eq!(engine.state().items.len(), 30);
    assert_eq!(engine.phase(), Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn retry_blocked_by_in_flight_fetch_is_not_charged() {
    let source = MockSource::new(100);
    source.fail_next(1);
    source.delay_next(&[2_000]);
    let engine = Engine::builder()
        .source(source.clone())
        .build()
        .unwrap();

    let loading = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Backoff ends at ~1s while the initial load still holds the latch.
    engine.retry().await;
    assert_eq!(source.call_count(), 1);
    assert_eq!(engine.state().retry_count, 0);

    loading.await.unwrap();
    assert_eq!(engine.phase(), Phase::Failed);
    assert_eq!(engine.state().retry_count, 0);

    engine.retry().await;
    assert_eq!(source.call_count(), 2);
    assert_eq!(engine.state().retry_count, 1);
    assert_eq!(engine.state().items.len(), 30);
}

// ============================================================================
// Superseding
// ============================================================================

#[tokio::test(start_paused = true)]
async fn query_change_discards_previous_results() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .build()
        .unwrap();

    source.delay_next(&[500, 10]);
    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start().await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    engine.update_query(Query::new().search("test")).await;
    first.await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].offset, 0);
    assert_eq!(calls[1].limit, 30);
    assert_eq!(calls[1].search, "test");

    let state = engine.state();
    assert_eq!(state.items.len(), 30);
    assert!(state.items.iter().all(|r| r.search == "test"));
    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(engine.query().search, "test");
}

#[tokio::test]
async fn same_query_identity_is_noop() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .query(Query::new().search("a").filter("k", 1))
        .start()
        .await
        .unwrap();
    engine.load_more().await;

    engine
        .update_query(Query::new().filter("k", 1).search("a"))
        .await;

    assert_eq!(source.call_count(), 2);
    assert_eq!(engine.state().items.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn refresh_supersedes_in_flight_load_more() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    source.delay_next(&[500, 10]);
    let more = tokio::spawn({
        let engine = engine.clone();
        async move { engine.load_more().await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(engine.state().is_loading_more);

    engine.refresh().await;
    more.await.unwrap();

    let calls = source.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].offset, 0);

    let state = engine.state();
    assert_eq!(state.items.len(), 30);
    assert!(!state.is_loading_more);
    assert!(!state.is_refreshing);
    assert_eq!(state.phase, Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn reset_discards_in_flight_result() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    source.delay_next(&[500]);
    let more = tokio::spawn({
        let engine = engine.clone();
        async move { engine.load_more().await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    engine.reset();
    more.await.unwrap();

    let state = engine.state();
    assert!(state.items.is_empty());
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.has_more);

    // Loading works again from a clean slate.
    engine.start().await;
    assert_eq!(engine.state().items.len(), 30);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    engine.reset();
    let once = engine.state();
    engine.reset();

    assert_eq!(engine.state(), once);
    assert_eq!(once, Default::default());
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn shared_cache_serves_first_page() {
    let source = MockSource::new(100);
    let cache = Arc::new(ResponseCache::default());

    let first = Engine::builder()
        .source(source.clone())
        .cache_key("rows")
        .cache(cache.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(source.call_count(), 1);

    let second = Engine::builder()
        .source(source.clone())
        .cache_key("rows")
        .cache(cache.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(source.call_count(), 1);
    assert_eq!(second.state().items, first.state().items);
    assert_eq!(second.state().total_count, 100);
    assert!(second.state().has_more);
}

#[tokio::test]
async fn short_cached_page_is_a_miss() {
    let source = MockSource::new(10);
    let cache = Arc::new(ResponseCache::default());

    for _ in 0..2 {
        Engine::builder()
            .source(source.clone())
            .cache_key("rows")
            .cache(cache.clone())
            .start()
            .await
            .unwrap();
    }

    assert_eq!(source.call_count(), 2);
}

#[tokio::test]
async fn cache_keyed_by_query_identity() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .cache_key("rows")
        .start()
        .await
        .unwrap();

    engine.update_query(Query::new().search("x")).await;
    engine.update_query(Query::new()).await;

    assert_eq!(source.call_count(), 2);
    assert!(engine.state().items.iter().all(|r| r.search.is_empty()));
}

#[tokio::test]
async fn refresh_bypasses_and_clears_cache() {
    let source = MockSource::new(100);
    let cache = Arc::new(ResponseCache::default());
    let engine = Engine::builder()
        .source(source.clone())
        .cache_key("rows")
        .cache(cache.clone())
        .start()
        .await
        .unwrap();
    cache.set("other:key", &[], 0, Duration::from_secs(60));

    engine.refresh().await;

    assert_eq!(source.call_count(), 2);
    assert!(cache.get("other:key", Duration::from_secs(60)).is_some());
    assert!(
        cache
            .get(
                &Query::new().cache_key("rows").unwrap(),
                Duration::from_secs(60)
            )
            .is_some(),
        "refresh result is cached again"
    );
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn callbacks_fire_after_transitions() {
    let source = MockSource::new(100);
    let loading = Arc::new(Mutex::new(Vec::new()));
    let data = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicU32::new(0));

    let engine = Engine::builder()
        .source(source.clone())
        .on_loading_change({
            let loading = loading.clone();
            move |b| loading.lock().unwrap().push(b)
        })
        .on_data_change({
            let data = data.clone();
            move |items: &[Row], total| data.lock().unwrap().push((items.len(), total))
        })
        .on_error({
            let errors = errors.clone();
            move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start()
        .await
        .unwrap();

    engine.load_more().await;
    source.fail_next(1);
    engine.load_more().await;

    assert_eq!(*loading.lock().unwrap(), vec![true, false]);
    assert_eq!(*data.lock().unwrap(), vec![(30, 100), (50, 100)]);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_initial_load_reports_error_then_loading_off() {
    let source = MockSource::new(100);
    source.fail_next(1);
    let events = Arc::new(Mutex::new(Vec::new()));

    Engine::builder()
        .source(source.clone())
        .on_error({
            let events = events.clone();
            move |e| events.lock().unwrap().push(format!("error: {e}"))
        })
        .on_loading_change({
            let events = events.clone();
            move |b| events.lock().unwrap().push(format!("loading: {b}"))
        })
        .start()
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], "loading: true");
    assert!(events[1].starts_with("error: "));
    assert_eq!(events[2], "loading: false");
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_stops_everything() {
    let source = MockSource::new(100);
    let engine = Engine::builder()
        .source(source.clone())
        .start()
        .await
        .unwrap();

    engine.shutdown();
    engine.shutdown();
    engine.load_more().await;
    engine.start().await;
    engine.refresh().await;

    assert!(engine.is_shut_down());
    assert_eq!(source.call_count(), 1);
    assert!(engine.state().items.is_empty());
}

#[tokio::test]
async fn shutdown_leaves_shared_cache_alone() {
    let source = MockSource::new(100);
    let cache = Arc::new(ResponseCache::default());
    let engine = Engine::builder()
        .source(source.clone())
        .cache_key("rows")
        .cache(cache.clone())
        .start()
        .await
        .unwrap();

    engine.shutdown();

    assert!(!cache.is_shut_down());
    assert!(!cache.is_empty());
}
