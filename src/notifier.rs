//! Application-facing event delivery.
//!
//! The notifier receives decoded results from the session and fans them out
//! to broadcast subscribers and registered callbacks. It also keeps the last
//! known device values.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Event surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceEvent {
    /// The LED state was read, written or notified.
    LedState(bool),
    /// A button reading was read or notified.
    ButtonValue(u8),
    /// The session ended.
    Disconnected,
}

/// Last known decoded device values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceSnapshot {
    /// LED on/off, if known.
    pub led_on: Option<bool>,
    /// Last button reading, if known.
    pub button: Option<u8>,
}

impl DeviceSnapshot {
    fn apply(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::LedState(on) => self.led_on = Some(on),
            DeviceEvent::ButtonValue(value) => self.button = Some(value),
            DeviceEvent::Disconnected => *self = Self::default(),
        }
    }
}

/// Keeps an LED, button or disconnect callback registered.
///
/// Returned by [`EventNotifier::on_led_state`], [`EventNotifier::on_button_value`]
/// and [`EventNotifier::on_disconnected`]. The callback stops firing once the
/// handle is dropped or [`CallbackHandle::unregister`] is called.
pub struct CallbackHandle {
    id: u64,
    stop_listener: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, stop_listener: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            stop_listener: Some(Box::new(stop_listener)),
        }
    }

    /// Stop delivering events to this callback.
    pub fn unregister(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop_listener.take() {
            stop();
        }
    }

    /// Registration number, unique within one notifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Delivers [`DeviceEvent`]s to the application.
#[derive(Clone)]
pub struct EventNotifier {
    /// Event channel.
    event_tx: broadcast::Sender<DeviceEvent>,
    /// Last known values.
    snapshot: Arc<RwLock<DeviceSnapshot>>,
    /// Callback ID counter.
    callback_counter: Arc<AtomicU64>,
}

impl EventNotifier {
    /// Create a notifier with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            event_tx,
            snapshot: Arc::new(RwLock::new(DeviceSnapshot::default())),
            callback_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an event in the snapshot and send it to all subscribers.
    pub(crate) fn publish(&self, event: DeviceEvent) {
        self.snapshot.write().apply(event);

        let receivers = self.event_tx.send(event).unwrap_or(0);
        trace!("Published {:?} to {} receivers", event, receivers);
    }

    /// Get the last known device values.
    pub fn snapshot(&self) -> DeviceSnapshot {
        *self.snapshot.read()
    }

    /// Subscribe to all device events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for LED state changes.
    pub fn on_led_state<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let DeviceEvent::LedState(on) = event {
                callback(on);
            }
        })
    }

    /// Register a callback for button readings.
    pub fn on_button_value<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let DeviceEvent::ButtonValue(value) = event {
                callback(value);
            }
        })
    }

    /// Register a callback for disconnection.
    pub fn on_disconnected<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(move |event| {
            if event == DeviceEvent::Disconnected {
                callback();
            }
        })
    }

    fn register<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Callback {} lagged, skipped {} events", callback_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("snapshot", &self.snapshot())
            .field("receivers", &self.event_tx.receiver_count())
            .finish()
    }
}
