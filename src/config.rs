//! Engine configuration.
//!
//! [`EngineConfig`] holds every tunable of an engine except the pieces that
//! cannot be written down (the data source, callbacks, a shared cache, the
//! viewport). It is plain data: build it in code with the fluent setters,
//! or load it from TOML:
//!
//! ```toml
//! initial_load_size = 50
//! load_more_size = 25
//! max_items_in_memory = 500     # 0 = unbounded
//! cache_key = "inventory"
//! cache_duration_ms = 60000
//! max_retries = 5
//! retry_delay_ms = 250
//!
//! [query]
//! search = "rune"
//! sort_by = "name"
//! sort_order = "asc"
//!
//! [query.filters]
//! category = "weapons"
//!
//! [virtualization]
//! enabled = true
//! item_height = 48.0
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::buffer::{DEFAULT_MAX_ITEMS_IN_MEMORY, MemoryBound};
use crate::proximity::DEFAULT_TRIGGER_OFFSET;
use crate::retry::RetryPolicy;
use crate::types::Query;
use crate::viewport::{
    DEFAULT_ITEM_HEIGHT, DEFAULT_OVERSCAN, DEFAULT_SCROLL_TO_TOP_THRESHOLD, Virtualization,
};
use crate::{HuginnError, Result};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Page size of the first load (default: 30).
    #[serde(default = "default_initial_load_size")]
    pub initial_load_size: usize,
    /// Page size of each load-more (default: 20).
    #[serde(default = "default_load_more_size")]
    pub load_more_size: usize,
    /// Buffer ceiling (default: 1000). `None`, or `0` in a config file,
    /// disables eviction.
    #[serde(
        default = "default_max_items_in_memory",
        deserialize_with = "deserialize_max_items"
    )]
    pub max_items_in_memory: Option<usize>,
    /// Cache namespace. Caching is disabled when absent.
    #[serde(default)]
    pub cache_key: Option<String>,
    /// First-page cache TTL in milliseconds (default: 300000).
    #[serde(default = "default_cache_duration_ms")]
    pub cache_duration_ms: u64,
    /// Retry ceiling (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Distance from the end, in pixels, that counts as near (default: 200).
    #[serde(default = "default_trigger_offset")]
    pub trigger_offset: f64,
    #[serde(default)]
    pub query: Query,
    #[serde(default)]
    pub virtualization: VirtualizationConfig,
}

/// Fixed-height virtualization settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualizationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Row height in pixels (default: 60).
    #[serde(default = "default_item_height")]
    pub item_height: f64,
    /// Extra rows on each side of the visible range (default: 5).
    #[serde(default = "default_overscan")]
    pub overscan: usize,
    /// Scroll offset past which "scroll to top" is offered (default: 500).
    #[serde(default = "default_scroll_to_top_threshold")]
    pub scroll_to_top_threshold: f64,
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            item_height: default_item_height(),
            overscan: default_overscan(),
            scroll_to_top_threshold: default_scroll_to_top_threshold(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_load_size: default_initial_load_size(),
            load_more_size: default_load_more_size(),
            max_items_in_memory: default_max_items_in_memory(),
            cache_key: None,
            cache_duration_ms: default_cache_duration_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            trigger_offset: default_trigger_offset(),
            query: Query::default(),
            virtualization: VirtualizationConfig::default(),
        }
    }
}

fn default_initial_load_size() -> usize {
    30
}

fn default_load_more_size() -> usize {
    20
}

fn default_max_items_in_memory() -> Option<usize> {
    Some(DEFAULT_MAX_ITEMS_IN_MEMORY)
}

fn default_cache_duration_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_trigger_offset() -> f64 {
    DEFAULT_TRIGGER_OFFSET
}

fn default_item_height() -> f64 {
    DEFAULT_ITEM_HEIGHT
}

fn default_overscan() -> usize {
    DEFAULT_OVERSCAN
}

fn default_scroll_to_top_threshold() -> f64 {
    DEFAULT_SCROLL_TO_TOP_THRESHOLD
}

fn deserialize_max_items<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = usize::deserialize(deserializer)?;
    Ok((value > 0).then_some(value))
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.initial_load_size == 0 {
            return Err(HuginnError::Configuration(
                "initial_load_size must be greater than zero".into(),
            ));
        }
        if self.load_more_size == 0 {
            return Err(HuginnError::Configuration(
                "load_more_size must be greater than zero".into(),
            ));
        }
        if self.max_items_in_memory == Some(0) {
            return Err(HuginnError::Configuration(
                "max_items_in_memory must be greater than zero (use None for unbounded)".into(),
            ));
        }
        if self.cache_key.as_deref() == Some("") {
            return Err(HuginnError::Configuration(
                "cache_key must not be empty".into(),
            ));
        }
        let height = self.virtualization.item_height;
        if self.virtualization.enabled && !(height.is_finite() && height > 0.0) {
            return Err(HuginnError::Configuration(format!(
                "virtualization.item_height must be a positive number, got {height}"
            )));
        }
        Ok(())
    }

    pub fn initial_load_size(mut self, n: usize) -> Self {
        self.initial_load_size = n;
        self
    }

    pub fn load_more_size(mut self, n: usize) -> Self {
        self.load_more_size = n;
        self
    }

    /// `None` disables eviction.
    pub fn max_items_in_memory(mut self, n: Option<usize>) -> Self {
        self.max_items_in_memory = n;
        self
    }

    /// Enable first-page caching under `namespace`.
    pub fn cache_key(mut self, namespace: impl Into<String>) -> Self {
        self.cache_key = Some(namespace.into());
        self
    }

    pub fn cache_duration(mut self, ttl: Duration) -> Self {
        self.cache_duration_ms = ttl.as_millis() as u64;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn trigger_offset(mut self, pixels: f64) -> Self {
        self.trigger_offset = pixels;
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Turn on fixed-height virtualization.
    pub fn virtualized(mut self, item_height: f64) -> Self {
        self.virtualization.enabled = true;
        self.virtualization.item_height = item_height;
        self
    }

    pub fn cache_duration_value(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
    }

    pub fn memory_bound(&self) -> MemoryBound {
        MemoryBound::new(self.max_items_in_memory)
    }

    pub fn virtualization_settings(&self) -> Virtualization {
        Virtualization {
            enabled: self.virtualization.enabled,
            item_height: self.virtualization.item_height,
            overscan: self.virtualization.overscan,
        }
    }
}
