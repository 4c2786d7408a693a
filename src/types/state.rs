//! Observable engine state

use std::fmt;

use crate::HuginnError;

/// Orchestrator state-machine position.
///
/// ```text
/// Idle ──► LoadingInitial ──► Ready ◄──► LoadingMore
///              │                │  ▲
///              │                ▼  │
///              │            Refreshing
///              ▼                │
///           Failed ◄────────────┘ (from any loading state)
///              │
///              ▼
///           Retrying ──► LoadingInitial | LoadingMore
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Refreshing,
    Failed,
    Retrying,
}

impl Phase {
    /// Whether a data-source call (or retry backoff) is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Phase::LoadingInitial | Phase::LoadingMore | Phase::Refreshing | Phase::Retrying
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::LoadingInitial => "loading-initial",
            Phase::Ready => "ready",
            Phase::LoadingMore => "loading-more",
            Phase::Refreshing => "refreshing",
            Phase::Failed => "failed",
            Phase::Retrying => "retrying",
        };
        f.write_str(name)
    }
}

/// Snapshot of everything a consumer renders.
///
/// Owned and mutated only by the [`Engine`](crate::Engine); consumers get
/// clones via [`Engine::state()`](crate::Engine::state) or a watch channel
/// from [`Engine::subscribe()`](crate::Engine::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState<T> {
    /// Buffered items, oldest first.
    pub items: Vec<T>,
    /// Authoritative total reported by the data source.
    pub total_count: usize,
    pub has_more: bool,
    /// Initial load (or refresh) in progress.
    pub is_loading: bool,
    pub is_loading_more: bool,
    /// The in-progress initial load was requested through `refresh()`.
    pub is_refreshing: bool,
    /// Most recent data-source failure, cleared by the next accepted load.
    pub error: Option<HuginnError>,
    pub retry_count: u32,
    pub phase: Phase,
    /// Absolute index of `items[0]` in the full result set.
    ///
    /// Zero until the memory bound evicts items from the front.
    pub window_start: usize,
}

impl<T> Default for EngineState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            has_more: true,
            is_loading: false,
            is_loading_more: false,
            is_refreshing: false,
            error: None,
            retry_count: 0,
            phase: Phase::Idle,
            window_start: 0,
        }
    }
}

impl<T> EngineState<T> {
    /// Offset of the next page to request.
    pub fn next_offset(&self) -> usize {
        self.window_start + self.items.len()
    }

    /// Whether a load-more call would currently be accepted.
    pub fn can_load_more(&self) -> bool {
        !self.is_loading_more && self.has_more && !self.is_loading && self.error.is_none()
    }

    /// Whether the proximity sensor should trigger a load-more.
    ///
    /// Unlike [`can_load_more()`](Self::can_load_more) this does not look at
    /// `error`; the load-more guard still rejects the call while an error is
    /// set.
    pub fn wants_more(&self) -> bool {
        self.has_more && !self.is_loading && !self.is_loading_more
    }
}
