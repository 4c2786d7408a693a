//! Builder for configuring engine instances

use std::sync::Arc;
use std::time::Duration;

use super::callbacks::Callbacks;
use super::{CacheBinding, Engine, Settings};
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::EngineConfig;
use crate::proximity::ProximityTrigger;
use crate::source::DataSource;
use crate::types::Query;
use crate::viewport::Viewport;
use crate::{HuginnError, Result};

/// Builder for configuring engine instances.
pub struct EngineBuilder<T> {
    source: Option<Arc<dyn DataSource<T>>>,
    config: EngineConfig,
    cache: Option<Arc<ResponseCache<T>>>,
    callbacks: Callbacks<T>,
    viewport: Option<Arc<dyn Viewport>>,
}

impl<T> EngineBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            source: None,
            config: EngineConfig::default(),
            cache: None,
            callbacks: Callbacks::default(),
            viewport: None,
        }
    }

    /// Set the data source (required).
    pub fn source(mut self, source: impl DataSource<T> + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set a data source that is shared with other owners.
    pub fn source_arc(mut self, source: Arc<dyn DataSource<T>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace every tunable at once, e.g. with a config loaded from TOML.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn initial_load_size(mut self, n: usize) -> Self {
        self.config = self.config.initial_load_size(n);
        self
    }

    pub fn load_more_size(mut self, n: usize) -> Self {
        self.config = self.config.load_more_size(n);
        self
    }

    /// Buffer ceiling; `None` disables eviction.
    pub fn max_items_in_memory(mut self, n: Option<usize>) -> Self {
        self.config = self.config.max_items_in_memory(n);
        self
    }

    /// Enable first-page caching under `namespace`.
    ///
    /// Without [`cache()`](Self::cache) the engine builds a private cache.
    pub fn cache_key(mut self, namespace: impl Into<String>) -> Self {
        self.config = self.config.cache_key(namespace);
        self
    }

    pub fn cache_duration(mut self, ttl: Duration) -> Self {
        self.config = self.config.cache_duration(ttl);
        self
    }

    /// Share a cache between engines.
    ///
    /// Only used when a cache key is configured.
    pub fn cache(mut self, cache: Arc<ResponseCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config = self.config.max_retries(n);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.retry_delay(delay);
        self
    }

    pub fn trigger_offset(mut self, pixels: f64) -> Self {
        self.config = self.config.trigger_offset(pixels);
        self
    }

    /// Initial search, filters and sort.
    pub fn query(mut self, query: Query) -> Self {
        self.config = self.config.query(query);
        self
    }

    /// Turn on fixed-height virtualization.
    pub fn virtualized(mut self, item_height: f64) -> Self {
        self.config = self.config.virtualized(item_height);
        self
    }

    pub fn overscan(mut self, rows: usize) -> Self {
        self.config.virtualization.overscan = rows;
        self
    }

    pub fn scroll_to_top_threshold(mut self, pixels: f64) -> Self {
        self.config.virtualization.scroll_to_top_threshold = pixels;
        self
    }

    pub fn viewport(mut self, viewport: Arc<dyn Viewport>) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Called with the error after every failed fetch.
    pub fn on_error(mut self, f: impl Fn(&HuginnError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// Called with `true` when an initial load or refresh starts and with
    /// `false` when it settles.
    pub fn on_loading_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.callbacks.on_loading_change = Some(Arc::new(f));
        self
    }

    /// Called with the buffer and total count after every applied page.
    pub fn on_data_change(mut self, f: impl Fn(&[T], usize) + Send + Sync + 'static) -> Self {
        self.callbacks.on_data_change = Some(Arc::new(f));
        self
    }

    /// Build the engine without loading anything.
    pub fn build(self) -> Result<Engine<T>> {
        let source = self
            .source
            .ok_or_else(|| HuginnError::Configuration("a data source is required".into()))?;
        self.config.validate()?;

        let config = self.config;
        let cache_duration = config.cache_duration_value();
        let cache = config.cache_key.clone().map(|namespace| match self.cache {
            Some(cache) => CacheBinding {
                cache,
                namespace,
                owned: false,
            },
            None => CacheBinding {
                cache: Arc::new(ResponseCache::new(&CacheConfig::new().ttl(cache_duration))),
                namespace,
                owned: true,
            },
        });

        let settings = Settings {
            initial_load_size: config.initial_load_size,
            load_more_size: config.load_more_size,
            bound: config.memory_bound(),
            retry: config.retry_policy(),
            cache_duration,
            trigger: ProximityTrigger::new(config.trigger_offset),
            virtualization: config.virtualization_settings(),
            scroll_to_top_threshold: config.virtualization.scroll_to_top_threshold,
        };

        tracing::debug!(
            source = source.name(),
            initial_load_size = settings.initial_load_size,
            load_more_size = settings.load_more_size,
            max_items_in_memory = ?settings.bound.max_items(),
            cache = ?cache.as_ref().map(|c| c.namespace.as_str()),
            "engine built"
        );

        Ok(Engine::from_parts(
            source,
            settings,
            config.query,
            cache,
            self.callbacks,
            self.viewport,
        ))
    }

    /// Build the engine and load the first page.
    pub async fn start(self) -> Result<Engine<T>> {
        let engine = self.build()?;
        engine.start().await;
        Ok(engine)
    }
}

impl<T> Default for EngineBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
