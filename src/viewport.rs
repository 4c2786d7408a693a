//! Scrollable viewport interface and visible-range calculation.
//!
//! The engine never lays anything out. It reads scroll geometry from a
//! [`Viewport`] the consumer attaches, turns it into a [`VisibleRange`] of
//! item indices, and forwards scroll commands back to the viewport.

use serde::{Deserialize, Serialize};

/// Default fixed row height used for virtualization, in pixels.
pub const DEFAULT_ITEM_HEIGHT: f64 = 60.0;
/// Default number of extra rows kept on each side of the visible range.
pub const DEFAULT_OVERSCAN: usize = 5;
/// Default scroll offset past which a "scroll to top" affordance is shown.
pub const DEFAULT_SCROLL_TO_TOP_THRESHOLD: f64 = 500.0;

/// How a scroll command should be animated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrollBehavior {
    #[default]
    Smooth,
    Instant,
}

/// Scroll geometry as reported by a viewport, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollGeometry {
    pub scroll_top: f64,
    pub client_height: f64,
    /// Total scrollable content height. Only the proximity trigger needs it.
    pub scroll_height: f64,
}

/// A scrollable container the engine can read from and command.
pub trait Viewport: Send + Sync {
    /// Current geometry, or `None` if the viewport is not laid out yet.
    fn geometry(&self) -> Option<ScrollGeometry>;

    /// Scroll so that `scroll_top == top`.
    fn scroll_to(&self, top: f64, behavior: ScrollBehavior);
}

/// Inclusive range of item indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

impl VisibleRange {
    /// Widen by `overscan` rows on both sides, clamped to `[0, item_count)`.
    pub fn with_overscan(self, overscan: usize, item_count: usize) -> Self {
        let last = item_count.saturating_sub(1);
        Self {
            start: self.start.saturating_sub(overscan).min(last),
            end: self.end.saturating_add(overscan).min(last),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Fixed-height virtualization settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Virtualization {
    pub enabled: bool,
    pub item_height: f64,
    pub overscan: usize,
}

impl Default for Virtualization {
    fn default() -> Self {
        Self {
            enabled: false,
            item_height: DEFAULT_ITEM_HEIGHT,
            overscan: DEFAULT_OVERSCAN,
        }
    }
}

impl Virtualization {
    /// Virtualization on, with the given row height.
    pub fn fixed(item_height: f64) -> Self {
        Self {
            enabled: true,
            item_height,
            ..Self::default()
        }
    }

    /// Visible range for `item_count` items, or `None` if virtualization is
    /// off or the geometry is unusable.
    pub fn range(
        &self,
        geometry: Option<ScrollGeometry>,
        item_count: usize,
    ) -> Option<VisibleRange> {
        if !self.enabled {
            return None;
        }
        let geometry = geometry?;
        visible_range(
            geometry.scroll_top,
            geometry.client_height,
            self.item_height,
            item_count,
        )
    }

    /// Scroll offset that puts `index` at the top of the viewport.
    pub fn offset_of(&self, index: usize) -> f64 {
        index as f64 * self.item_height
    }
}

/// Items intersecting `[scroll_top, scroll_top + viewport_height]`.
///
/// `start = floor(scroll_top / item_height)`,
/// `end = min(item_count - 1, ceil((scroll_top + viewport_height) / item_height))`.
/// Returns `None` for an empty list or a non-positive (or non-finite) item
/// height. Negative scroll offsets (overscroll bounce) clamp to zero.
pub fn visible_range(
    scroll_top: f64,
    viewport_height: f64,
    item_height: f64,
    item_count: usize,
) -> Option<VisibleRange> {
    if item_count == 0 || !item_height.is_finite() || item_height <= 0.0 {
        return None;
    }
    let scroll_top = scroll_top.max(0.0);
    let viewport_height = viewport_height.max(0.0);
    let last = item_count - 1;
    let start = ((scroll_top / item_height).floor() as usize).min(last);
    let end = ((scroll_top + viewport_height) / item_height).ceil() as usize;
    Some(VisibleRange {
        start,
        end: end.min(last),
    })
}

/// Whether a "scroll to top" affordance should be offered.
pub fn should_show_scroll_to_top(scroll_top: f64, threshold: f64) -> bool {
    scroll_top > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_at_top() {
        let range = visible_range(0.0, 600.0, 60.0, 100).unwrap();
        assert_eq!(range, VisibleRange { start: 0, end: 10 });
    }

    #[test]
    fn range_mid_scroll() {
        let range = visible_range(630.0, 600.0, 60.0, 100).unwrap();
        assert_eq!(range.start, 10);
        assert_eq!(range.end, 21);
    }

    #[test]
    fn range_clamped_to_item_count() {
        let range = visible_range(0.0, 6_000.0, 60.0, 30).unwrap();
        assert_eq!(range.end, 29);
    }

    #[test]
    fn range_unavailable() {
        assert!(visible_range(0.0, 600.0, 60.0, 0).is_none());
        assert!(visible_range(0.0, 600.0, 0.0, 10).is_none());
        assert!(visible_range(0.0, 600.0, f64::NAN, 10).is_none());
    }

    #[test]
    fn overscan_widens_and_clamps() {
        let range = VisibleRange { start: 2, end: 10 }.with_overscan(5, 12);
        assert_eq!(range, VisibleRange { start: 0, end: 11 });
        assert_eq!(range.len(), 12);
        assert!(range.contains(0));
    }

    #[test]
    fn disabled_virtualization_has_no_range() {
        let geometry = ScrollGeometry {
            scroll_top: 0.0,
            client_height: 600.0,
            scroll_height: 6_000.0,
        };
        assert!(Virtualization::default().range(Some(geometry), 100).is_none());
        assert!(Virtualization::fixed(60.0).range(None, 100).is_none());
        assert!(Virtualization::fixed(60.0).range(Some(geometry), 100).is_some());
    }

    #[test]
    fn scroll_to_top_threshold() {
        assert!(!should_show_scroll_to_top(500.0, DEFAULT_SCROLL_TO_TOP_THRESHOLD));
        assert!(should_show_scroll_to_top(501.0, DEFAULT_SCROLL_TO_TOP_THRESHOLD));
    }
}
