//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `kind` — fetch kind: "initial", "more" or "refresh"
//! - `status` — outcome: "ok", "error" or "cancelled"
//! - `namespace` — cache namespace

/// Total data-source calls issued by the orchestrator.
///
/// Labels: `kind`, `status`.
pub const FETCHES_TOTAL: &str = "huginn_fetches_total";

/// Data-source call duration in seconds.
///
/// Labels: `kind`.
pub const FETCH_DURATION_SECONDS: &str = "huginn_fetch_duration_seconds";

/// Results that resolved after being superseded and were discarded.
///
/// Labels: `kind`.
pub const DISCARDED_TOTAL: &str = "huginn_discarded_total";

/// Total first-page cache hits.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total first-page cache misses (absent, expired or too short).
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total items dropped from the front of the buffer.
pub const EVICTED_ITEMS_TOTAL: &str = "huginn_evicted_items_total";

/// Total accepted `retry()` calls (dropped calls past the ceiling excluded).
pub const RETRIES_TOTAL: &str = "huginn_retries_total";
