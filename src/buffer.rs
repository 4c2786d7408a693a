//! Memory-bounded item buffer.
//!
//! Load-more appends through [`MemoryBound::append`], which keeps at most
//! `max_items` entries by dropping the oldest from the front. Scrolling
//! forever therefore holds a sliding window of the most recently loaded
//! items instead of the whole result set.

use tracing::warn;

use crate::telemetry;

/// Default ceiling on buffered items.
pub const DEFAULT_MAX_ITEMS_IN_MEMORY: usize = 1_000;

/// Eviction policy for the engine's item buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBound {
    max_items: Option<usize>,
}

impl Default for MemoryBound {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_ITEMS_IN_MEMORY))
    }
}

impl MemoryBound {
    /// `None` disables eviction.
    pub fn new(max_items: Option<usize>) -> Self {
        Self { max_items }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    /// Append `incoming` to `existing`, then trim from the front.
    ///
    /// Returns the number of evicted items (0 when nothing was dropped).
    /// A non-zero eviction is reported as a warning and counted in
    /// [`telemetry::EVICTED_ITEMS_TOTAL`]; it never fails the load.
    pub fn append<T>(&self, existing: &mut Vec<T>, incoming: Vec<T>) -> usize {
        existing.extend(incoming);
        let Some(max) = self.max_items else {
            return 0;
        };
        if existing.len() <= max {
            return 0;
        }
        let evicted = existing.len() - max;
        existing.drain(..evicted);
        warn!(
            evicted,
            retained = existing.len(),
            max_items = max,
            "evicted oldest items to stay within memory bound"
        );
        metrics::counter!(telemetry::EVICTED_ITEMS_TOTAL).increment(evicted as u64);
        evicted
    }
}
