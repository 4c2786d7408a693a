//! Page results returned by data sources

use serde::{Deserialize, Serialize};

/// One page of data plus the authoritative total.
///
/// `total_count` may exceed both `data.len()` and the number of items the
/// engine currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult<T> {
    pub data: Vec<T>,
    pub total_count: usize,
    pub has_more: bool,
}

impl<T> LoadResult<T> {
    pub fn new(data: Vec<T>, total_count: usize, has_more: bool) -> Self {
        Self {
            data,
            total_count,
            has_more,
        }
    }

    /// Build a result for the page starting at `offset`, deriving `has_more`
    /// from whether the page reaches `total_count`.
    pub fn page(data: Vec<T>, offset: usize, total_count: usize) -> Self {
        let has_more = offset + data.len() < total_count;
        Self::new(data, total_count, has_more)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, false)
    }
}
