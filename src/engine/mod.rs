//! Fetch orchestrator.
//!
//! [`Engine`] owns one [`EngineState`] and is the only thing that mutates
//! it. Every public operation is a request to move the state machine; the
//! engine decides whether the request is accepted, talks to the
//! [`DataSource`] (or the [`ResponseCache`]) and applies the result.
//!
//! # Request lifecycle
//!
//! ```text
//! load_more() ─┐
//! start()     ─┼─► guard ──► issue ticket ──► cache? ──► DataSource::fetch
//! retry()     ─┘    │         (seq += 1,         │             │
//!                   │          new token)        ▼             ▼
//!                   ▼                         settle: ticket still current?
//!                 dropped                      ├─ yes: apply + callbacks
//!                                              └─ no:  discard silently
//! ```
//!
//! # Single flight
//!
//! At most one ordinary fetch (initial load, load-more, retry) is in flight.
//! A second ordinary call while one is outstanding is dropped, not queued.
//! `refresh()` and `update_query()` supersede instead: they cancel the
//! outstanding fetch's token and take over the latch.
//!
//! # Superseded results
//!
//! Each fetch is issued a ticket carrying a monotonically increasing
//! sequence number and a cancellation token. A result is applied only if its
//! ticket is still the latest one issued and its token has not fired.
//! `reset()`, `update_query()`, `refresh()` and `shutdown()` all bump the
//! sequence, so anything they overtake lands in the discard path.
//!
//! # Tokens
//!
//! ```text
//! root (shutdown / drop)
//!  ├── lifecycle (replaced on reset, refresh and identity change)
//!  │    ├── fetch token (one per ticket)
//!  │    └── retry backoff timers
//!  └── sensor subscriptions
//! ```

mod builder;
mod callbacks;

pub use builder::EngineBuilder;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::HuginnError;
use crate::buffer::MemoryBound;
use crate::cache::ResponseCache;
use crate::proximity::{ProximityEvent, ProximityTrigger, SensorSubscription};
use crate::retry::{self, RetryPolicy};
use crate::source::DataSource;
use crate::telemetry;
use crate::types::{EngineState, LoadRequest, LoadResult, Phase, Query};
use crate::viewport::{
    ScrollBehavior, Viewport, Virtualization, VisibleRange, should_show_scroll_to_top,
};

use callbacks::Callbacks;

/// Resolved, validated settings.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) initial_load_size: usize,
    pub(crate) load_more_size: usize,
    pub(crate) bound: MemoryBound,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache_duration: Duration,
    pub(crate) trigger: ProximityTrigger,
    pub(crate) virtualization: Virtualization,
    pub(crate) scroll_to_top_threshold: f64,
}

/// A cache plus the namespace this engine writes under.
pub(crate) struct CacheBinding<T> {
    pub(crate) cache: Arc<ResponseCache<T>>,
    pub(crate) namespace: String,
    /// Built privately by the builder rather than shared by the caller.
    pub(crate) owned: bool,
}

impl<T> CacheBinding<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn key(&self, query: &Query) -> Option<String> {
        query.cache_key(&self.namespace)
    }

    fn clear_namespace(&self) -> usize {
        self.cache.clear(&format!("{}:", self.namespace))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Initial,
    More,
    Refresh,
}

impl FetchKind {
    fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Initial => "initial",
            FetchKind::More => "more",
            FetchKind::Refresh => "refresh",
        }
    }
}

/// Why an initial load was started.
///
/// `Retry` carries the sequence number seen when the retry was accepted;
/// the load is dropped if anything was issued or abandoned since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Initial {
    Start,
    Refresh,
    NewIdentity,
    Retry { seq: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Ordinary,
    Retry { seq: u64 },
}

/// An accepted request.
#[derive(Debug)]
struct Ticket {
    seq: u64,
    token: CancellationToken,
    kind: FetchKind,
    request: LoadRequest,
    cache_key: Option<String>,
    use_cache: bool,
}

enum Outcome<T> {
    Loaded(LoadResult<T>),
    Failed(HuginnError),
    Cancelled,
}

impl<T> Outcome<T> {
    fn status(&self) -> &'static str {
        match self {
            Outcome::Loaded(_) => "ok",
            Outcome::Failed(_) => "error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// What to tell the consumer once the locks are released.
enum Notify<T> {
    Data(Option<(Vec<T>, usize)>),
    Error(HuginnError),
    Nothing,
}

/// Latch, sequence and tokens. Guarded by one mutex so that issuing and
/// settling a ticket are atomic with the matching state change.
struct Control {
    query: Query,
    in_flight: bool,
    seq: u64,
    fetch: Option<CancellationToken>,
    lifecycle: CancellationToken,
    shut_down: bool,
}

impl Control {
    fn issue(
        &mut self,
        kind: FetchKind,
        request: LoadRequest,
        cache_key: Option<String>,
        use_cache: bool,
    ) -> Ticket {
        self.in_flight = true;
        self.seq += 1;
        if let Some(previous) = self.fetch.take() {
            previous.cancel();
        }
        let token = self.lifecycle.child_token();
        self.fetch = Some(token.clone());
        Ticket {
            seq: self.seq,
            token,
            kind,
            request,
            cache_key,
            use_cache,
        }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.seq == ticket.seq && !ticket.token.is_cancelled()
    }

    fn settle(&mut self) {
        self.in_flight = false;
        self.fetch = None;
    }

    /// Invalidate every outstanding ticket and timer.
    fn abandon_all(&mut self, root: &CancellationToken) {
        self.seq += 1;
        self.in_flight = false;
        if let Some(fetch) = self.fetch.take() {
            fetch.cancel();
        }
        self.rotate_lifecycle(root);
    }

    /// Cancel pending retry timers and fetches under the current lifecycle.
    fn rotate_lifecycle(&mut self, root: &CancellationToken) {
        self.lifecycle.cancel();
        self.lifecycle = root.child_token();
    }
}

struct Inner<T> {
    source: Arc<dyn DataSource<T>>,
    settings: Settings,
    cache: Option<CacheBinding<T>>,
    callbacks: Callbacks<T>,
    control: Mutex<Control>,
    state: watch::Sender<EngineState<T>>,
    viewport: Mutex<Option<Arc<dyn Viewport>>>,
    root: CancellationToken,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Incremental loader for one paginated query.
///
/// Cheap to clone; clones share the same state. Build one with
/// [`Engine::builder()`].
///
/// ```rust,no_run
/// use huginn::{Engine, LoadRequest, LoadResult, source_fn};
///
/// #[tokio::main]
/// async fn main() -> huginn::Result<()> {
///     let engine = Engine::builder()
///         .source(source_fn(|req: LoadRequest, _cancel| async move {
///             let data: Vec<usize> = (req.offset..req.offset + req.limit).collect();
///             Ok(LoadResult::page(data, req.offset, 1_000))
///         }))
///         .start()
///         .await?;
///
///     engine.load_more().await;
///     assert_eq!(engine.state().items.len(), 50);
///     Ok(())
/// }
/// ```
pub struct Engine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Engine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new builder.
    pub fn builder() -> EngineBuilder<T> {
        EngineBuilder::new()
    }

    pub(crate) fn from_parts(
        source: Arc<dyn DataSource<T>>,
        settings: Settings,
        query: Query,
        cache: Option<CacheBinding<T>>,
        callbacks: Callbacks<T>,
        viewport: Option<Arc<dyn Viewport>>,
    ) -> Self {
        let root = CancellationToken::new();
        let control = Control {
            query,
            in_flight: false,
            seq: 0,
            fetch: None,
            lifecycle: root.child_token(),
            shut_down: false,
        };
        let (state, _) = watch::channel(EngineState::default());
        Self {
            inner: Arc::new(Inner {
                source,
                settings,
                cache,
                callbacks,
                control: Mutex::new(control),
                state,
                viewport: Mutex::new(viewport),
                root,
            }),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Clone of the current state.
    pub fn state(&self) -> EngineState<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver that is notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<EngineState<T>> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase
    }

    /// The query the engine is currently loading.
    pub fn query(&self) -> Query {
        self.inner.control().query.clone()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Load the first page of the current query.
    ///
    /// Dropped if another ordinary fetch is in flight.
    pub async fn start(&self) {
        self.inner.run_initial(Initial::Start, None).await;
    }

    /// Load the next page and append it to the buffer.
    ///
    /// No-op while loading, when there is nothing more, or while an error
    /// is set (call [`retry()`](Self::retry) first).
    pub async fn load_more(&self) {
        self.inner.run_more(Origin::Ordinary).await;
    }

    /// Drop this query's cached pages and reload the first page, superseding
    /// whatever is in flight.
    pub async fn refresh(&self) {
        if self.is_shut_down() {
            return;
        }
        if let Some(binding) = &self.inner.cache {
            let removed = binding.clear_namespace();
            debug!(
                namespace = binding.namespace.as_str(),
                removed, "cleared cached pages for refresh"
            );
        }
        self.inner.run_initial(Initial::Refresh, None).await;
    }

    /// Repeat the load that last failed, after exponential backoff.
    ///
    /// Ignored once `retry_count` reaches the retry ceiling.
    pub async fn retry(&self) {
        self.inner.run_retry().await;
    }

    /// Return to `Idle` with empty state.
    ///
    /// Results of fetches issued before the reset are discarded and pending
    /// retry timers are cancelled.
    pub fn reset(&self) {
        let mut ctl = self.inner.control();
        ctl.abandon_all(&self.inner.root);
        self.inner.state.send_replace(EngineState::default());
        debug!("engine reset");
    }

    /// Switch to a new query.
    ///
    /// If `query` has the same identity as the current one this is a no-op.
    /// Otherwise outstanding work is abandoned, the state is emptied and the
    /// first page of the new query is loaded.
    pub async fn update_query(&self, query: Query) {
        let changed = {
            let ctl = self.inner.control();
            !same_identity(&ctl.query, &query)
        };
        if !changed {
            debug!("query identity unchanged, keeping current results");
            return;
        }
        self.inner
            .run_initial(Initial::NewIdentity, Some(query))
            .await;
    }

    /// Tear the engine down.
    ///
    /// Cancels every fetch, retry timer and sensor subscription, detaches
    /// the viewport and releases a privately owned cache. All operations are
    /// no-ops afterwards. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut ctl = self.inner.control();
            if ctl.shut_down {
                return;
            }
            ctl.shut_down = true;
            ctl.abandon_all(&self.inner.root);
        }
        self.inner.root.cancel();
        *self.inner.viewport_slot() = None;
        if let Some(binding) = &self.inner.cache {
            if binding.owned {
                binding.cache.shutdown();
            }
        }
        self.inner.state.send_replace(EngineState::default());
        debug!("engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.control().shut_down
    }

    // ========================================================================
    // Proximity sensor
    // ========================================================================

    /// Subscribe to a proximity sensor.
    ///
    /// On every far→near transition, and after every state change while the
    /// last reading is still near, the engine calls
    /// [`load_more()`](Self::load_more) if
    /// `has_more && !is_loading && !is_loading_more`. The subscription ends
    /// when the stream ends, the returned handle is dropped or detached, or
    /// the engine shuts down.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach_sensor<S>(&self, sensor: S) -> SensorSubscription
    where
        S: Stream<Item = ProximityEvent> + Send + 'static,
    {
        let cancel = self.inner.root.child_token();
        let task_cancel = cancel.clone();
        let weak = Arc::downgrade(&self.inner);
        let mut states = self.inner.state.subscribe();

        let task = tokio::spawn(async move {
            let mut sensor = std::pin::pin!(sensor);
            let mut near = false;
            loop {
                let check = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    event = sensor.next() => match event {
                        Some(event) => {
                            let rising = event.near && !near;
                            near = event.near;
                            rising
                        }
                        None => break,
                    },
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        near
                    }
                };
                if !check {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let wants_more = inner.state.borrow().wants_more();
                if wants_more {
                    debug!("proximity sensor near, loading more");
                    inner.run_more(Origin::Ordinary).await;
                }
            }
            debug!("proximity sensor detached");
        });

        SensorSubscription::new(cancel, task)
    }

    /// Proximity test configured by `trigger_offset`.
    pub fn proximity_trigger(&self) -> ProximityTrigger {
        self.inner.settings.trigger
    }

    // ========================================================================
    // Viewport
    // ========================================================================

    /// Attach (or replace) the scrollable viewport.
    pub fn attach_viewport(&self, viewport: Arc<dyn Viewport>) {
        *self.inner.viewport_slot() = Some(viewport);
    }

    pub fn detach_viewport(&self) {
        *self.inner.viewport_slot() = None;
    }

    /// Scroll the viewport back to the first item.
    pub fn scroll_to_top(&self) {
        if let Some(viewport) = self.inner.viewport() {
            viewport.scroll_to(0.0, ScrollBehavior::Smooth);
        }
    }

    /// Scroll so that buffer index `index` is at the top.
    ///
    /// Requires virtualization (the row height is otherwise unknown).
    pub fn scroll_to_item(&self, index: usize) {
        let virtualization = self.inner.settings.virtualization;
        if !virtualization.enabled {
            debug!(index, "scroll_to_item ignored: virtualization disabled");
            return;
        }
        if let Some(viewport) = self.inner.viewport() {
            viewport.scroll_to(virtualization.offset_of(index), ScrollBehavior::Smooth);
        }
    }

    /// Buffer indices currently in view.
    ///
    /// `None` when virtualization is off, no viewport is attached, the
    /// viewport has no geometry yet, or the buffer is empty.
    pub fn visible_range(&self) -> Option<VisibleRange> {
        let count = self.inner.state.borrow().items.len();
        let geometry = self.inner.viewport().and_then(|v| v.geometry());
        self.inner.settings.virtualization.range(geometry, count)
    }

    /// [`visible_range()`](Self::visible_range) widened by the overscan.
    pub fn rendered_range(&self) -> Option<VisibleRange> {
        let count = self.inner.state.borrow().items.len();
        let overscan = self.inner.settings.virtualization.overscan;
        self.visible_range()
            .map(|range| range.with_overscan(overscan, count))
    }

    /// Whether the viewport is scrolled far enough to offer "scroll to top".
    pub fn show_scroll_to_top(&self) -> bool {
        self.inner
            .viewport()
            .and_then(|v| v.geometry())
            .is_some_and(|g| {
                should_show_scroll_to_top(g.scroll_top, self.inner.settings.scroll_to_top_threshold)
            })
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn viewport_slot(&self) -> MutexGuard<'_, Option<Arc<dyn Viewport>>> {
        self.viewport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn viewport(&self) -> Option<Arc<dyn Viewport>> {
        self.viewport_slot().clone()
    }

    // ========================================================================
    // Initial load
    // ========================================================================

    /// Returns `false` if the load was not issued.
    async fn run_initial(&self, mode: Initial, next_query: Option<Query>) -> bool {
        let kind = if mode == Initial::Refresh {
            FetchKind::Refresh
        } else {
            FetchKind::Initial
        };
        let retried = matches!(mode, Initial::Retry { .. });
        let ticket = {
            let mut ctl = self.control();
            if ctl.shut_down {
                return false;
            }
            match mode {
                Initial::NewIdentity => {
                    ctl.abandon_all(&self.root);
                    if let Some(query) = next_query {
                        ctl.query = query;
                    }
                }
                Initial::Refresh => ctl.rotate_lifecycle(&self.root),
                Initial::Retry { seq } if ctl.seq != seq => {
                    debug!("superseded while backing off, dropping retry");
                    return false;
                }
                Initial::Start | Initial::Retry { .. } => {
                    if ctl.in_flight {
                        debug!(
                            kind = kind.as_str(),
                            "fetch already in flight, dropping initial load"
                        );
                        return false;
                    }
                }
            }
            let request = LoadRequest::new(0, self.settings.initial_load_size, &ctl.query);
            let cache_key = self.cache.as_ref().and_then(|c| c.key(&ctl.query));
            let ticket = ctl.issue(kind, request, cache_key, mode != Initial::Refresh);
            self.state.send_modify(|s| {
                if mode == Initial::NewIdentity {
                    *s = EngineState::default();
                }
                s.is_loading = true;
                s.is_refreshing = mode == Initial::Refresh;
                s.is_loading_more = false;
                s.error = None;
                if !retried {
                    s.retry_count = 0;
                }
                s.phase = if mode == Initial::Refresh {
                    Phase::Refreshing
                } else {
                    Phase::LoadingInitial
                };
            });
            ticket
        };

        self.callbacks.loading(true);
        let outcome = self.fetch(&ticket).await;
        self.finish_initial(&ticket, outcome, retried);
        true
    }

    fn finish_initial(&self, ticket: &Ticket, outcome: Outcome<T>, retried: bool) {
        let notify = {
            let mut ctl = self.control();
            if !ctl.is_current(ticket) {
                self.discard(ticket);
                return;
            }
            ctl.settle();
            match outcome {
                Outcome::Loaded(result) => {
                    let snapshot = self.callbacks.wants_data();
                    let mut data = None;
                    self.state.send_modify(|s| {
                        s.items = result.data;
                        s.window_start = 0;
                        s.total_count = result.total_count;
                        s.has_more = result.has_more;
                        s.is_loading = false;
                        s.is_refreshing = false;
                        s.error = None;
                        s.phase = Phase::Ready;
                        if !retried {
                            s.retry_count = 0;
                        }
                        if snapshot {
                            data = Some((s.items.clone(), s.total_count));
                        }
                    });
                    Notify::Data(data)
                }
                Outcome::Failed(err) => {
                    self.state.send_modify(|s| {
                        s.is_loading = false;
                        s.is_refreshing = false;
                        s.error = Some(err.clone());
                        s.phase = Phase::Failed;
                    });
                    Notify::Error(err)
                }
                Outcome::Cancelled => {
                    self.state.send_modify(|s| {
                        s.is_loading = false;
                        s.is_refreshing = false;
                        s.phase = settled_phase(s);
                    });
                    Notify::Nothing
                }
            }
        };

        match notify {
            Notify::Data(data) => {
                if let Some((items, total_count)) = data {
                    self.callbacks.data(&items, total_count);
                }
                self.callbacks.loading(false);
            }
            Notify::Error(err) => {
                self.callbacks.error(&err);
                self.callbacks.loading(false);
            }
            Notify::Nothing => {}
        }
    }

    // ========================================================================
    // Load more
    // ========================================================================

    /// Returns `false` if the load was not issued.
    async fn run_more(&self, origin: Origin) -> bool {
        let ticket = {
            let mut ctl = self.control();
            if ctl.shut_down {
                return false;
            }
            if matches!(origin, Origin::Retry { seq } if seq != ctl.seq) {
                debug!("superseded while backing off, dropping retry");
                return false;
            }
            let offset = {
                let s = self.state.borrow();
                let blocked = s.is_loading_more
                    || !s.has_more
                    || s.is_loading
                    || (origin == Origin::Ordinary && s.error.is_some());
                if blocked {
                    debug!(
                        is_loading_more = s.is_loading_more,
                        has_more = s.has_more,
                        is_loading = s.is_loading,
                        has_error = s.error.is_some(),
                        "load more rejected by guard"
                    );
                    return false;
                }
                s.next_offset()
            };
            if ctl.in_flight {
                debug!("fetch already in flight, dropping load more");
                return false;
            }
            let request = LoadRequest::new(offset, self.settings.load_more_size, &ctl.query);
            let cache_key = self.cache.as_ref().and_then(|c| c.key(&ctl.query));
            let ticket = ctl.issue(FetchKind::More, request, cache_key, true);
            self.state.send_modify(|s| {
                s.is_loading_more = true;
                s.error = None;
                s.phase = Phase::LoadingMore;
            });
            ticket
        };

        let outcome = self.fetch(&ticket).await;
        self.finish_more(&ticket, outcome, origin);
        true
    }

    fn finish_more(&self, ticket: &Ticket, outcome: Outcome<T>, origin: Origin) {
        let notify = {
            let mut ctl = self.control();
            if !ctl.is_current(ticket) {
                self.discard(ticket);
                return;
            }
            ctl.settle();
            match outcome {
                Outcome::Loaded(result) => {
                    let snapshot = self.callbacks.wants_data();
                    let bound = self.settings.bound;
                    let mut data = None;
                    self.state.send_modify(|s| {
                        let evicted = bound.append(&mut s.items, result.data);
                        s.window_start += evicted;
                        s.total_count = result.total_count;
                        s.has_more = result.has_more;
                        s.is_loading_more = false;
                        s.error = None;
                        s.phase = Phase::Ready;
                        if origin == Origin::Ordinary {
                            s.retry_count = 0;
                        }
                        if snapshot {
                            data = Some((s.items.clone(), s.total_count));
                        }
                    });
                    Notify::Data(data)
                }
                Outcome::Failed(err) => {
                    self.state.send_modify(|s| {
                        s.is_loading_more = false;
                        s.error = Some(err.clone());
                        s.phase = Phase::Failed;
                    });
                    Notify::Error(err)
                }
                Outcome::Cancelled => {
                    self.state.send_modify(|s| {
                        s.is_loading_more = false;
                        s.phase = settled_phase(s);
                    });
                    Notify::Nothing
                }
            }
        };

        match notify {
            Notify::Data(Some((items, total_count))) => self.callbacks.data(&items, total_count),
            Notify::Error(err) => self.callbacks.error(&err),
            Notify::Data(None) | Notify::Nothing => {}
        }
    }

    // ========================================================================
    // Retry
    // ========================================================================

    async fn run_retry(&self) {
        let policy = self.settings.retry;
        let accepted = {
            let ctl = self.control();
            if ctl.shut_down {
                return;
            }
            let mut previous = None;
            self.state.send_if_modified(|s| {
                if !policy.allows(s.retry_count) {
                    return false;
                }
                previous = Some(s.retry_count);
                s.retry_count += 1;
                s.phase = Phase::Retrying;
                true
            });
            previous.map(|retry_count| (retry_count, ctl.seq, ctl.lifecycle.clone()))
        };
        let Some((previous, seq, lifecycle)) = accepted else {
            debug!(
                max_retries = policy.max_retries,
                "retry ceiling reached, ignoring retry"
            );
            return;
        };

        metrics::counter!(telemetry::RETRIES_TOTAL).increment(1);
        let delay = policy.delay(previous);
        debug!(
            attempt = previous + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        if !retry::backoff(delay, &lifecycle).await {
            debug!("retry cancelled during backoff");
            return;
        }

        let empty = self.state.borrow().items.is_empty();
        let issued = if empty {
            self.run_initial(Initial::Retry { seq }, None).await
        } else {
            self.run_more(Origin::Retry { seq }).await
        };
        if !issued {
            // Nothing reached the source, so the attempt is not charged.
            self.state.send_if_modified(|s| {
                if s.phase != Phase::Retrying {
                    return false;
                }
                s.retry_count = previous;
                s.phase = settled_phase(s);
                true
            });
        }
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    #[instrument(
        skip(self, ticket),
        fields(
            kind = ticket.kind.as_str(),
            seq = ticket.seq,
            offset = ticket.request.offset,
            limit = ticket.request.limit,
        )
    )]
    async fn fetch(&self, ticket: &Ticket) -> Outcome<T> {
        if let Some(page) = self.cached_page(ticket) {
            return Outcome::Loaded(page);
        }

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => Err(HuginnError::Cancelled),
            result = self.source.fetch(&ticket.request, &ticket.token) => result,
        };
        let outcome = match result {
            Ok(result) => Outcome::Loaded(result),
            Err(err) if err.is_cancellation() => Outcome::Cancelled,
            Err(err) => {
                warn!(
                    source = self.source.name(),
                    error = %err,
                    transient = err.is_transient(),
                    "fetch failed"
                );
                Outcome::Failed(err)
            }
        };
        Self::record_fetch(ticket.kind, &outcome, start);

        if let Outcome::Loaded(result) = &outcome {
            self.store_first_page(ticket, result);
        }
        outcome
    }

    /// Serve the first page from cache if it holds at least `limit` items.
    fn cached_page(&self, ticket: &Ticket) -> Option<LoadResult<T>> {
        if !ticket.use_cache || !ticket.request.is_first_page() {
            return None;
        }
        let binding = self.cache.as_ref()?;
        let key = ticket.cache_key.as_deref()?;
        let limit = ticket.request.limit;
        match binding.cache.get(key, self.settings.cache_duration) {
            Some(page) if page.data.len() >= limit => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL,
                    "namespace" => binding.namespace.clone(),
                )
                .increment(1);
                debug!(key, "serving first page from cache");
                let has_more = page.data.len() < page.total_count;
                let mut data = page.data;
                data.truncate(limit);
                Some(LoadResult::new(data, page.total_count, has_more))
            }
            _ => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
                    "namespace" => binding.namespace.clone(),
                )
                .increment(1);
                None
            }
        }
    }

    fn store_first_page(&self, ticket: &Ticket, result: &LoadResult<T>) {
        if !ticket.request.is_first_page() || ticket.token.is_cancelled() {
            return;
        }
        let (Some(binding), Some(key)) = (self.cache.as_ref(), ticket.cache_key.as_deref()) else {
            return;
        };
        binding.cache.set(
            key,
            &result.data,
            result.total_count,
            self.settings.cache_duration,
        );
    }

    fn discard(&self, ticket: &Ticket) {
        metrics::counter!(telemetry::DISCARDED_TOTAL, "kind" => ticket.kind.as_str()).increment(1);
        debug!(
            seq = ticket.seq,
            kind = ticket.kind.as_str(),
            "discarding result of superseded request"
        );
    }

    /// Record fetch outcome metrics (counter + histogram).
    fn record_fetch(kind: FetchKind, outcome: &Outcome<T>, start: Instant) {
        let elapsed = start.elapsed().as_secs_f64();
        metrics::counter!(telemetry::FETCHES_TOTAL,
            "kind" => kind.as_str(),
            "status" => outcome.status(),
        )
        .increment(1);
        metrics::histogram!(telemetry::FETCH_DURATION_SECONDS,
            "kind" => kind.as_str(),
        )
        .record(elapsed);
    }
}

/// Resting phase for a state with no request outstanding.
fn settled_phase<T>(state: &EngineState<T>) -> Phase {
    if state.error.is_some() {
        Phase::Failed
    } else if state.items.is_empty() {
        Phase::Idle
    } else {
        Phase::Ready
    }
}

fn same_identity(a: &Query, b: &Query) -> bool {
    match (a.identity(), b.identity()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}
