//! Data source trait.
//!
//! The engine knows nothing about transports. A [`DataSource`] turns a
//! [`LoadRequest`] into a [`LoadResult`] (or an error) and is free to
//! observe the cancellation token it is handed: when the token fires the
//! engine has already moved on, so the source may abort early and return
//! [`HuginnError::Cancelled`](crate::HuginnError::Cancelled).
//!
//! # Example
//!
//! ```rust
//! use huginn::{LoadRequest, LoadResult, source_fn};
//!
//! let rows: Vec<u32> = (0..100).collect();
//! let source = source_fn(move |req: LoadRequest, _cancel| {
//!     let rows = rows.clone();
//!     async move {
//!         let page: Vec<u32> = rows.iter().copied().skip(req.offset).take(req.limit).collect();
//!         Ok(LoadResult::page(page, req.offset, rows.len()))
//!     }
//! });
//! # let _ = source;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::types::{LoadRequest, LoadResult};

/// A paginated data source.
#[async_trait]
pub trait DataSource<T>: Send + Sync {
    /// Source name for logging/debugging.
    fn name(&self) -> &str {
        "data-source"
    }

    /// Fetch one page.
    ///
    /// Failures are reported as `Err`, never as sentinel values. The engine
    /// races this future against `cancel`, so a source that ignores the
    /// token is still abandoned promptly.
    async fn fetch(&self, request: &LoadRequest, cancel: &CancellationToken)
    -> Result<LoadResult<T>>;
}

#[async_trait]
impl<T, S> DataSource<T> for Arc<S>
where
    T: Send + 'static,
    S: DataSource<T> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadResult<T>> {
        (**self).fetch(request, cancel).await
    }
}

/// Adapter turning an async closure into a [`DataSource`].
///
/// Created with [`source_fn`].
pub struct FnSource<F> {
    name: String,
    f: F,
}

/// Wrap `f(request, cancel)` as a [`DataSource`].
pub fn source_fn<T, F, Fut>(f: F) -> FnSource<F>
where
    F: Fn(LoadRequest, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LoadResult<T>>> + Send,
{
    FnSource {
        name: "fn-source".to_owned(),
        f,
    }
}

impl<F> FnSource<F> {
    /// Override the name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<T, F, Fut> DataSource<T> for FnSource<F>
where
    T: Send + 'static,
    F: Fn(LoadRequest, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LoadResult<T>>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadResult<T>> {
        (self.f)(request.clone(), cancel.clone()).await
    }
}
