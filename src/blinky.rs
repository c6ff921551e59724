//! Blinky device handle.
//!
//! [`Blinky`] is the application-facing side of a session. It owns a single
//! background task that exclusively holds the [`SessionMachine`]: application
//! commands, transport results and transport events are all funneled into
//! that task, so every state transition happens on one execution path.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::platform::BtleplugTransport;
use crate::ble::transport::{Transport, TransportEvent};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::notifier::{CallbackHandle, DeviceEvent, DeviceSnapshot, EventNotifier};
use crate::protocol::encode_led;
use crate::session::{Effect, OperationOutcome, SessionEvent, SessionMachine, SessionState};

/// Handle to a Nordic LED Button Service peripheral.
pub struct Blinky {
    /// Application commands into the driver task.
    command_tx: mpsc::Sender<SessionEvent>,
    /// Mirror of the machine's state.
    state_rx: watch::Receiver<SessionState>,
    /// Event delivery.
    notifier: EventNotifier,
    /// Driver task handle.
    driver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Blinky {
    /// Create a handle backed by the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: SessionConfig) -> Result<Self> {
        let transport = BtleplugTransport::new(config.scan_timeout).await?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Create a handle over any transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_transport(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let notifier = EventNotifier::new(config.event_capacity);

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let transport_events = transport.subscribe_events();

        let driver = SessionDriver {
            machine: SessionMachine::new(),
            transport,
            notifier: notifier.clone(),
            state_tx,
            completion_tx,
            link_task: None,
            config,
        };
        let handle = tokio::spawn(driver.run(command_rx, completion_rx, transport_events));

        Self {
            command_tx,
            state_rx,
            notifier,
            driver_handle: Mutex::new(Some(handle)),
        }
    }

    // === Commands ===

    /// Start connecting to the peripheral with the given address or advertised name.
    ///
    /// Progress is observable through [`Blinky::state`]. A failed attempt ends
    /// in a [`DeviceEvent::Disconnected`] without ever reaching `Ready`.
    pub async fn connect(&self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        info!("Connecting to {}", address);
        self.send(SessionEvent::ConnectRequested { address }).await
    }

    /// Disconnect from the peripheral.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(SessionEvent::DisconnectRequested).await
    }

    /// Turn the LED on or off.
    ///
    /// Dropped without error if the session is not initializing or ready.
    pub async fn set_led(&self, on: bool) -> Result<()> {
        debug!("Turning LED {}...", if on { "ON" } else { "OFF" });
        self.set_led_raw(encode_led(on)).await
    }

    /// Write a raw byte to the LED characteristic.
    ///
    /// Dropped without error if the session is not initializing or ready.
    pub async fn set_led_raw(&self, value: u8) -> Result<()> {
        self.send(SessionEvent::WriteRequested { value }).await
    }

    /// Disconnect and stop the driver task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down session");

        if self.disconnect().await.is_ok() {
            if let Err(e) = self
                .wait_for_state(SessionState::Disconnected, Duration::from_secs(5))
                .await
            {
                warn!("Session did not disconnect cleanly: {}", e);
            }
        }

        let handle = self.driver_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        Ok(())
    }

    async fn send(&self, event: SessionEvent) -> Result<()> {
        self.command_tx
            .send(event)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    // === State ===

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Check if the session is ready for LED commands.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Check if a link to the peripheral is held.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch session state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until the session reaches `state`.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the state is not reached in time, or
    /// [`Error::SessionClosed`] if the driver stopped.
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::SessionClosed)?;
        Ok(())
    }

    // === Events ===

    /// Get the last known LED and button values.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.notifier.snapshot()
    }

    /// Subscribe to device events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.notifier.subscribe()
    }

    /// Register a callback for LED state changes.
    pub fn on_led_state<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.notifier.on_led_state(callback)
    }

    /// Register a callback for button readings.
    pub fn on_button_value<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.notifier.on_button_value(callback)
    }

    /// Register a callback for disconnection.
    pub fn on_disconnected<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.on_disconnected(callback)
    }
}

impl Drop for Blinky {
    fn drop(&mut self) {
        if let Some(handle) = self.driver_handle.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Blinky {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blinky")
            .field("state", &self.state())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// The task that owns the state machine.
struct SessionDriver {
    machine: SessionMachine,
    transport: Arc<dyn Transport>,
    notifier: EventNotifier,
    state_tx: watch::Sender<SessionState>,
    completion_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Last connect or teardown handed to the transport.
    link_task: Option<JoinHandle<()>>,
    config: SessionConfig,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionEvent>,
        mut completions: mpsc::UnboundedReceiver<SessionEvent>,
        mut transport_events: broadcast::Receiver<TransportEvent>,
    ) {
        debug!("Session driver started");
        let mut transport_open = true;

        loop {
            let event = tokio::select! {
                biased;

                Some(event) = completions.recv() => event,
                result = transport_events.recv(), if transport_open => match result {
                    Ok(TransportEvent::Notification { characteristic, value }) => {
                        SessionEvent::Notification { characteristic, value }
                    }
                    Ok(TransportEvent::Disconnected) => SessionEvent::Disconnected {
                        generation: self.machine.generation(),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} transport events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        transport_open = false;
                        continue;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            self.advance(event);
        }

        debug!("Session driver stopped");
    }

    fn advance(&mut self, event: SessionEvent) {
        let effects = self.machine.handle(event);
        self.state_tx.send_replace(self.machine.state());

        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Notify(event) => self.notifier.publish(event),
            Effect::Connect {
                address,
                generation,
            } => {
                let transport = self.transport.clone();
                let timeout = self.config.connect_timeout;
                self.spawn_link(async move {
                    Some(match with_timeout(timeout, transport.connect(&address)).await {
                        Ok(()) => SessionEvent::Connected { generation },
                        Err(e) => SessionEvent::ConnectFailed {
                            generation,
                            reason: e.to_string(),
                        },
                    })
                });
            }
            Effect::DiscoverServices { generation } => {
                let transport = self.transport.clone();
                let timeout = self.config.discovery_timeout;
                self.spawn(async move {
                    match with_timeout(timeout, transport.discover_services()).await {
                        Ok(services) => SessionEvent::ServicesDiscovered {
                            generation,
                            services,
                        },
                        Err(e) => SessionEvent::DiscoveryFailed {
                            generation,
                            reason: e.to_string(),
                        },
                    }
                });
            }
            Effect::Dispatch(operation) => {
                let transport = self.transport.clone();
                let timeout = self.config.operation_timeout;
                self.spawn(async move {
                    let result = with_timeout(timeout, transport.dispatch(&operation)).await;
                    SessionEvent::OperationCompleted {
                        operation_id: operation.id(),
                        outcome: OperationOutcome::from(result),
                    }
                });
            }
            Effect::Disconnect { generation, report } => {
                let transport = self.transport.clone();
                let timeout = self.config.disconnect_timeout;
                self.spawn_link(async move {
                    if let Err(e) = with_timeout(timeout, transport.disconnect()).await {
                        warn!("Transport disconnect failed: {}", e);
                    }
                    report.then_some(SessionEvent::Disconnected { generation })
                });
            }
        }
    }

    /// Run a transport call off the driver task and feed its result back in.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = completion_tx.send(task.await);
        });
    }

    /// Like [`SessionDriver::spawn`], but runs only after the previous connect
    /// or teardown finished, so link calls never overlap on the transport.
    fn spawn_link<F>(&mut self, task: F)
    where
        F: Future<Output = Option<SessionEvent>> + Send + 'static,
    {
        let previous = self.link_task.take();
        let completion_tx = self.completion_tx.clone();
        self.link_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Some(event) = task.await {
                let _ = completion_tx.send(event);
            }
        }));
    }
}

async fn with_timeout<T>(duration: Duration, future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout)?
}
