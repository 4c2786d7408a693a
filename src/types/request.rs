//! Query identity and load request types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter values keyed by field name.
///
/// A `BTreeMap` keeps serialization order stable, so two equal filter sets
/// always produce the same cache key.
pub type Filters = BTreeMap<String, Value>;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity part of a request: what is being listed, not which page.
///
/// Two queries with the same [`identity()`](Self::identity) address the same
/// logical result set.
///
/// ```rust
/// # use huginn::{Query, SortOrder};
/// let query = Query::new()
///     .search("sword")
///     .filter("category", "weapons")
///     .sort_by("name")
///     .sort_order(SortOrder::Asc);
/// assert_eq!(query.sort_by.as_deref(), Some("name"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub search: String,
    pub filters: Filters,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text search string.
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    /// Add (or replace) a single filter.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    /// Replace all filters.
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the sort field.
    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort_by = Some(field.into());
        self
    }

    /// Set the sort direction.
    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    /// Stable identity string: `search:filters-json:sort_by:sort_order`.
    ///
    /// Returns `None` if the filters cannot be serialized; callers treat that
    /// as "not cacheable" rather than as an error.
    pub fn identity(&self) -> Option<String> {
        let filters = serde_json::to_string(&self.filters).ok()?;
        Some(format!(
            "{}:{}:{}:{}",
            self.search,
            filters,
            self.sort_by.as_deref().unwrap_or(""),
            self.sort_order
        ))
    }

    /// Cache key for this query under a namespace.
    pub fn cache_key(&self, namespace: &str) -> Option<String> {
        self.identity().map(|id| format!("{namespace}:{id}"))
    }
}

/// Parameters handed to a [`DataSource`](crate::DataSource) for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub offset: usize,
    pub limit: usize,
    pub search: String,
    pub filters: Filters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl LoadRequest {
    /// Build a request for the page `[offset, offset + limit)` of `query`.
    pub fn new(offset: usize, limit: usize, query: &Query) -> Self {
        Self {
            offset,
            limit,
            search: query.search.clone(),
            filters: query.filters.clone(),
            sort_by: query.sort_by.clone(),
            sort_order: query.sort_order,
        }
    }

    /// Whether this request addresses the first page.
    pub fn is_first_page(&self) -> bool {
        self.offset == 0
    }
}
