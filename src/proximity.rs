//! Viewport-proximity sensor interface.
//!
//! A sensor is any `Stream` of [`ProximityEvent`]s saying whether the load
//! trigger (the end of the rendered list) is near the viewport. The engine
//! subscribes with [`Engine::attach_sensor()`](crate::Engine::attach_sensor)
//! and gets back a [`SensorSubscription`]; dropping or detaching it stops
//! the subscriber task.
//!
//! Consumers without a native visibility signal can compute one from scroll
//! geometry with [`ProximityTrigger`] and push it through [`channel()`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::viewport::ScrollGeometry;

/// Default distance from the bottom, in pixels, that counts as "near".
pub const DEFAULT_TRIGGER_OFFSET: f64 = 200.0;

/// "The load trigger is (not) near the viewport."
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProximityEvent {
    pub near: bool,
}

impl ProximityEvent {
    pub fn near() -> Self {
        Self { near: true }
    }

    pub fn far() -> Self {
        Self { near: false }
    }
}

/// Geometric proximity test: near when the unscrolled remainder below the
/// viewport is at most `trigger_offset` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityTrigger {
    pub trigger_offset: f64,
}

impl Default for ProximityTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_OFFSET)
    }
}

impl ProximityTrigger {
    pub fn new(trigger_offset: f64) -> Self {
        Self { trigger_offset }
    }

    pub fn is_near(&self, geometry: &ScrollGeometry) -> bool {
        let remaining = geometry.scroll_height - (geometry.scroll_top + geometry.client_height);
        remaining <= self.trigger_offset
    }

    pub fn event(&self, geometry: &ScrollGeometry) -> ProximityEvent {
        ProximityEvent {
            near: self.is_near(geometry),
        }
    }
}

/// Sending half of a [`channel()`].
///
/// Only the latest reading matters, so rapid updates coalesce.
#[derive(Debug, Clone)]
pub struct ProximitySender {
    tx: Arc<watch::Sender<ProximityEvent>>,
}

impl ProximitySender {
    /// Publish a new reading. Never blocks; a reading with no listener is
    /// kept until one subscribes.
    pub fn set(&self, near: bool) {
        self.tx.send_replace(ProximityEvent { near });
    }

    /// Publish the reading for `geometry` under `trigger`.
    pub fn update(&self, trigger: &ProximityTrigger, geometry: &ScrollGeometry) {
        self.tx.send_replace(trigger.event(geometry));
    }
}

/// A sensor stream yielding every published reading after creation.
pub type ProximityStream = WatchStream<ProximityEvent>;

/// Create a sensor channel starting in the "far" state.
pub fn channel() -> (ProximitySender, ProximityStream) {
    let (tx, rx) = watch::channel(ProximityEvent::far());
    (ProximitySender { tx: Arc::new(tx) }, WatchStream::from_changes(rx))
}

/// Handle for an attached sensor. Dropping it detaches the sensor.
#[derive(Debug)]
pub struct SensorSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SensorSubscription {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop listening and wait for the subscriber task to finish.
    pub async fn detach(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the subscriber task is still running.
    pub fn is_attached(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
