//! Consumer callbacks.

use std::sync::Arc;

use crate::HuginnError;

pub(crate) type ErrorCallback = Arc<dyn Fn(&HuginnError) + Send + Sync>;
pub(crate) type LoadingCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub(crate) type DataCallback<T> = Arc<dyn Fn(&[T], usize) + Send + Sync>;

/// Optional hooks fired after each accepted state transition.
///
/// Callbacks run on the task that drove the transition, after the state
/// lock is released, so they may read [`Engine::state()`](crate::Engine::state)
/// freely.
pub(crate) struct Callbacks<T> {
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_loading_change: Option<LoadingCallback>,
    pub(crate) on_data_change: Option<DataCallback<T>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_error: None,
            on_loading_change: None,
            on_data_change: None,
        }
    }
}

impl<T> Callbacks<T> {
    pub(crate) fn error(&self, err: &HuginnError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }

    pub(crate) fn loading(&self, loading: bool) {
        if let Some(cb) = &self.on_loading_change {
            cb(loading);
        }
    }

    pub(crate) fn wants_data(&self) -> bool {
        self.on_data_change.is_some()
    }

    pub(crate) fn data(&self, items: &[T], total_count: usize) {
        if let Some(cb) = &self.on_data_change {
            cb(items, total_count);
        }
    }
}
