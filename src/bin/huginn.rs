//! huginn — drive an engine against a synthetic data source.
//!
//! Useful for eyeballing backoff, eviction and caching behaviour with a
//! given config file:
//!
//! ```text
//! RUST_LOG=huginn=debug huginn --config huginn.toml --items 5000 --pages 60 --fail-every 7
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huginn::{
    CancellationToken, Engine, EngineConfig, HuginnError, LoadRequest, LoadResult, Query,
    source_fn,
};

/// Simulate incremental loading against a synthetic source.
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::version::PKG_VERSION)]
#[command(about = "Huginn incremental loading simulator")]
struct Args {
    /// Path to an engine configuration file (TOML).
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// Number of rows the synthetic source holds.
    #[arg(long, default_value_t = 1_000)]
    items: usize,

    /// Simulated source latency in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Fail every Nth source call (0 disables failures).
    #[arg(long, default_value_t = 0)]
    fail_every: u32,

    /// Number of load-more calls to issue after the first page.
    #[arg(long, default_value_t = 10)]
    pages: usize,

    /// Search string, overriding the configured query.
    #[arg(long)]
    search: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huginn=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(search) = &args.search {
        config.query = Query {
            search: search.clone(),
            ..config.query
        };
    }

    info!(
        version = huginn::version::version_string(),
        items = args.items,
        latency_ms = args.latency_ms,
        fail_every = args.fail_every,
        "huginn starting"
    );

    let calls = Arc::new(AtomicU32::new(0));
    let source_calls = calls.clone();
    let total = args.items;
    let latency = Duration::from_millis(args.latency_ms);
    let fail_every = args.fail_every;

    let source = source_fn(move |req: LoadRequest, cancel: CancellationToken| {
        let calls = source_calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::select! {
                _ = cancel.cancelled() => return Err(HuginnError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
            if fail_every > 0 && n % fail_every == 0 {
                return Err(HuginnError::Api {
                    status: 503,
                    message: format!("simulated failure on call {n}"),
                });
            }
            let end = (req.offset + req.limit).min(total);
            let data: Vec<String> = (req.offset..end)
                .map(|i| format!("{}#{i}", req.search))
                .collect();
            Ok(LoadResult::page(data, req.offset, total))
        }
    })
    .named("synthetic");

    let engine: Engine<String> = Engine::builder()
        .source(source)
        .config(config)
        .on_error(|e| warn!(error = %e, "load failed"))
        .start()
        .await?;

    for _ in 0..args.pages {
        let state = engine.state();
        if state.error.is_some() {
            engine.retry().await;
            if engine.state().error.is_some() {
                warn!(retry_count = engine.state().retry_count, "giving up");
                break;
            }
            continue;
        }
        if !state.has_more {
            break;
        }
        engine.load_more().await;
    }

    let state = engine.state();
    info!(
        phase = %state.phase,
        buffered = state.items.len(),
        window_start = state.window_start,
        total_count = state.total_count,
        has_more = state.has_more,
        source_calls = calls.load(Ordering::SeqCst),
        "simulation finished"
    );
    engine.shutdown();
    Ok(())
}
