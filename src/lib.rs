//! Huginn - incremental loading engine for paginated data
//!
//! This crate keeps a bounded in-memory window over an arbitrarily large,
//! remotely paged list. A consumer plugs in a [`DataSource`] and drives an
//! [`Engine`] with `load_more()` / `refresh()` / `retry()`, usually from a
//! proximity sensor that fires when the end of the rendered list scrolls
//! into view. The engine guarantees single-flight fetching, discards
//! results that were superseded while in flight, caches first pages per
//! query identity and evicts the oldest items once the buffer outgrows its
//! ceiling.
//!
//! # Example
//!
//! ```rust,no_run
//! use huginn::{Engine, LoadRequest, LoadResult, Query, source_fn};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let engine = Engine::builder()
//!         .source(source_fn(|req: LoadRequest, _cancel| async move {
//!             let data: Vec<String> = (req.offset..req.offset + req.limit)
//!                 .map(|i| format!("{}-{i}", req.search))
//!                 .collect();
//!             Ok(LoadResult::page(data, req.offset, 500))
//!         }))
//!         .cache_key("rows")
//!         .on_error(|e| eprintln!("load failed: {e}"))
//!         .start()
//!         .await?;
//!
//!     engine.load_more().await;
//!     engine.update_query(Query::new().search("raven")).await;
//!
//!     let state = engine.state();
//!     println!("{} of {} rows", state.items.len(), state.total_count);
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `cli` — the `huginn` simulator binary (clap + tracing-subscriber)

pub mod buffer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod proximity;
pub mod retry;
pub mod source;
pub mod telemetry;
pub mod types;
pub mod version;
pub mod viewport;

// Re-export main types at crate root
pub use buffer::MemoryBound;
pub use cache::{CacheConfig, ResponseCache};
pub use config::{EngineConfig, VirtualizationConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{HuginnError, Result};
pub use proximity::{
    ProximityEvent, ProximitySender, ProximityStream, ProximityTrigger, SensorSubscription,
};
pub use retry::RetryPolicy;
pub use source::{DataSource, FnSource, source_fn};
pub use types::{EngineState, Filters, LoadRequest, LoadResult, Phase, Query, SortOrder};
pub use viewport::{ScrollBehavior, ScrollGeometry, Viewport, Virtualization, VisibleRange};

pub use tokio_util::sync::CancellationToken;
