//! The session state machine.
//!
//! `SessionMachine` is synchronous and owns no I/O. Every input arrives as a
//! [`SessionEvent`] through [`SessionMachine::handle`], and every side effect
//! the caller must perform comes back as an [`Effect`]. The driver in
//! [`crate::blinky`] executes effects against a transport and feeds the
//! results back in as new events.
//!
//! Invariants:
//! - at most one operation is in flight, and it is always the queue head;
//! - the handle set is replaced wholesale on validation and dropped on
//!   disconnection, never patched;
//! - nothing is dispatched outside `Initializing`/`Ready`.

use std::collections::VecDeque;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::operation::{Operation, OperationKind, OperationOutcome};
use super::state::SessionState;
use crate::ble::topology::{validate_topology, DiscoveredService, HandleSet};
use crate::ble::uuids::*;
use crate::error::Error;
use crate::notifier::DeviceEvent;
use crate::protocol::{decode_button, decode_led};

/// Input to the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The application asked to connect.
    ConnectRequested {
        /// Peripheral address or advertised name.
        address: String,
    },
    /// The transport finished connecting.
    Connected {
        /// Lifecycle the connect belonged to.
        generation: u64,
    },
    /// The transport could not connect.
    ConnectFailed {
        /// Lifecycle the connect belonged to.
        generation: u64,
        /// Description of the failure.
        reason: String,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Lifecycle the discovery belonged to.
        generation: u64,
        /// Services reported by the peripheral.
        services: Vec<DiscoveredService>,
    },
    /// Service discovery failed.
    DiscoveryFailed {
        /// Lifecycle the discovery belonged to.
        generation: u64,
        /// Description of the failure.
        reason: String,
    },
    /// The in-flight operation finished.
    OperationCompleted {
        /// ID of the operation that finished.
        operation_id: u64,
        /// Result reported by the transport.
        outcome: OperationOutcome,
    },
    /// The peripheral pushed a characteristic value.
    Notification {
        /// Characteristic that notified.
        characteristic: Uuid,
        /// Notified value.
        value: Vec<u8>,
    },
    /// The application asked to write the LED characteristic.
    WriteRequested {
        /// Byte to write.
        value: u8,
    },
    /// The application asked to disconnect.
    DisconnectRequested,
    /// The link is gone, requested or not.
    Disconnected {
        /// Lifecycle whose link went away.
        generation: u64,
    },
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Connect to the peripheral.
    Connect {
        /// Peripheral address or advertised name.
        address: String,
        /// Lifecycle to tag the result with.
        generation: u64,
    },
    /// Discover services on the connected peripheral.
    DiscoverServices {
        /// Lifecycle to tag the result with.
        generation: u64,
    },
    /// Hand one operation to the transport.
    Dispatch(Operation),
    /// Tear down the link.
    Disconnect {
        /// Lifecycle being torn down.
        generation: u64,
        /// Feed `Disconnected` back once the link is gone.
        report: bool,
    },
    /// Deliver an event to the application.
    Notify(DeviceEvent),
}

/// Operation queue and lifecycle state for one peripheral.
#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    handles: Option<HandleSet>,
    queue: VecDeque<Operation>,
    in_flight: bool,
    generation: u64,
    next_operation_id: u64,
}

impl SessionMachine {
    /// Create a machine in the `Disconnected` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Validated handles of the current lifecycle, if any.
    pub fn handles(&self) -> Option<&HandleSet> {
        self.handles.as_ref()
    }

    /// Current lifecycle generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of queued operations, including the in-flight one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The operation awaiting completion, if any.
    pub fn in_flight(&self) -> Option<&Operation> {
        if self.in_flight {
            self.queue.front()
        } else {
            None
        }
    }

    /// Iterate over queued operations in dispatch order.
    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.queue.iter()
    }

    /// Advance the machine by one event.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        trace!("Session event in {}: {:?}", self.state, event);

        match event {
            SessionEvent::ConnectRequested { address } => self.on_connect_requested(address),
            SessionEvent::Connected { generation } => self.on_connected(generation),
            SessionEvent::ConnectFailed { generation, reason } => {
                self.on_connect_failed(generation, &reason)
            }
            SessionEvent::ServicesDiscovered {
                generation,
                services,
            } => self.on_services_discovered(generation, &services),
            SessionEvent::DiscoveryFailed { generation, reason } => {
                self.on_discovery_failed(generation, &reason)
            }
            SessionEvent::OperationCompleted {
                operation_id,
                outcome,
            } => self.on_operation_complete(operation_id, outcome),
            SessionEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(&characteristic, &value),
            SessionEvent::WriteRequested { value } => self.enqueue_write(value),
            SessionEvent::DisconnectRequested => self.on_disconnect_requested(),
            SessionEvent::Disconnected { generation } => {
                if generation != self.generation {
                    debug!("Ignoring disconnect of generation {}", generation);
                    return Vec::new();
                }
                self.on_disconnected()
            }
        }
    }

    /// Queue the initialization sequence for a freshly validated handle set.
    ///
    /// Appends Read(LED), Read(Button), EnableNotifications(Button) and moves
    /// to `Initializing`. Only valid in `ValidatingTopology`.
    pub fn enqueue_initialization(&mut self, handles: HandleSet) -> Vec<Effect> {
        if self.state != SessionState::ValidatingTopology {
            warn!("Ignoring initialization in state {}", self.state);
            return Vec::new();
        }
        if handles.generation != self.generation {
            warn!(
                "Ignoring initialization for stale generation {} (current {})",
                handles.generation, self.generation
            );
            return Vec::new();
        }

        let read_led = Operation::read(self.next_id(), handles.led.clone());
        let read_button = Operation::read(self.next_id(), handles.button.clone());
        let enable = Operation::enable_notifications(self.next_id(), handles.button.clone());
        self.queue.extend([read_led, read_button, enable]);

        self.handles = Some(handles);
        self.set_state(SessionState::Initializing);

        self.dispatch_next()
    }

    /// Queue a single-byte write to the LED characteristic.
    ///
    /// Silently dropped unless the session is `Initializing` or `Ready` with a
    /// validated handle set.
    pub fn enqueue_write(&mut self, value: u8) -> Vec<Effect> {
        let led = match (&self.handles, self.state.accepts_writes()) {
            (Some(handles), true) => handles.led.clone(),
            _ => {
                debug!(
                    "Dropping LED write {:#04x}: session is {}",
                    value, self.state
                );
                return Vec::new();
            }
        };

        let operation = Operation::write(self.next_id(), led, value);
        debug!("Queued {}", operation);
        self.queue.push_back(operation);

        self.dispatch_next()
    }

    /// Retire the in-flight operation and dispatch the next one.
    ///
    /// Completions that don't match the in-flight operation are dropped.
    pub fn on_operation_complete(
        &mut self,
        operation_id: u64,
        outcome: OperationOutcome,
    ) -> Vec<Effect> {
        if self.in_flight().map(Operation::id) != Some(operation_id) {
            debug!("Dropping stale completion for operation #{}", operation_id);
            return Vec::new();
        }

        self.in_flight = false;
        let Some(operation) = self.queue.pop_front() else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        match outcome {
            OperationOutcome::Completed(value) => match operation.kind() {
                OperationKind::Read | OperationKind::Write => {
                    if let Some(event) = decode_value(&operation.target().uuid, &value) {
                        effects.push(Effect::Notify(event));
                    }
                }
                OperationKind::EnableNotifications => {
                    debug!("Notifications enabled on {}", operation.target().uuid);
                }
            },
            OperationOutcome::Failed { reason } => {
                let error = Error::OperationFailed {
                    reason: format!("{}: {}", operation, reason),
                };
                warn!("{}", error);
            }
        }

        effects.extend(self.dispatch_next());
        effects
    }

    /// Tear down the session after the link dropped.
    ///
    /// Abandons every queued operation, drops the handle set and notifies
    /// the application once. No-op when already disconnected.
    pub fn on_disconnected(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }

        if self.state != SessionState::Disconnecting {
            warn!("{} while {}", Error::UnexpectedDisconnect, self.state);
        }

        if !self.queue.is_empty() {
            debug!("Abandoning {} queued operations", self.queue.len());
        }
        self.queue.clear();
        self.in_flight = false;
        self.handles = None;
        self.set_state(SessionState::Disconnected);

        vec![Effect::Notify(DeviceEvent::Disconnected)]
    }

    fn on_connect_requested(&mut self, address: String) -> Vec<Effect> {
        if self.state != SessionState::Disconnected {
            debug!("Ignoring connect to {}: session is {}", address, self.state);
            return Vec::new();
        }

        self.generation += 1;
        self.set_state(SessionState::Connecting);

        vec![Effect::Connect {
            address,
            generation: self.generation,
        }]
    }

    fn on_connected(&mut self, generation: u64) -> Vec<Effect> {
        if generation != self.generation {
            debug!("Ignoring connect result of generation {}", generation);
            return Vec::new();
        }

        match self.state {
            SessionState::Connecting => {
                info!("Connected, discovering services");
                self.set_state(SessionState::DiscoveringServices);
                vec![Effect::DiscoverServices { generation }]
            }
            // The application gave up on this attempt while it was in progress.
            // The session already ended, so the teardown reports nothing back.
            SessionState::Disconnecting | SessionState::Disconnected => {
                vec![Effect::Disconnect {
                    generation,
                    report: false,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_connect_failed(&mut self, generation: u64, reason: &str) -> Vec<Effect> {
        if generation != self.generation || self.state != SessionState::Connecting {
            return Vec::new();
        }

        warn!("Connection failed: {}", reason);
        self.set_state(SessionState::Disconnecting);
        self.on_disconnected()
    }

    fn on_services_discovered(
        &mut self,
        generation: u64,
        services: &[DiscoveredService],
    ) -> Vec<Effect> {
        if generation != self.generation || self.state != SessionState::DiscoveringServices {
            debug!("Ignoring discovery result of generation {}", generation);
            return Vec::new();
        }

        debug!("Discovered {} services", services.len());
        self.set_state(SessionState::ValidatingTopology);

        match validate_topology(services, generation) {
            Ok(handles) => self.enqueue_initialization(handles),
            Err(e) => {
                if e.is_topology_rejection() {
                    warn!("Device not supported: {}", e);
                } else {
                    warn!("Topology validation failed: {}", e);
                }
                self.set_state(SessionState::Disconnecting);
                vec![self.teardown()]
            }
        }
    }

    fn on_discovery_failed(&mut self, generation: u64, reason: &str) -> Vec<Effect> {
        if generation != self.generation || self.state != SessionState::DiscoveringServices {
            return Vec::new();
        }

        warn!("Service discovery failed: {}", reason);
        self.set_state(SessionState::Disconnecting);
        vec![self.teardown()]
    }

    fn on_notification(&mut self, characteristic: &Uuid, value: &[u8]) -> Vec<Effect> {
        let known = self
            .handles
            .as_ref()
            .is_some_and(|h| h.by_uuid(characteristic).is_some());

        if !known {
            trace!("Ignoring notification from {}", characteristic);
            return Vec::new();
        }

        decode_value(characteristic, value)
            .map(Effect::Notify)
            .into_iter()
            .collect()
    }

    fn on_disconnect_requested(&mut self) -> Vec<Effect> {
        match self.state {
            SessionState::Disconnected | SessionState::Disconnecting => Vec::new(),
            _ => {
                info!("Disconnecting");
                self.set_state(SessionState::Disconnecting);
                vec![self.teardown()]
            }
        }
    }

    fn dispatch_next(&mut self) -> Vec<Effect> {
        if self.in_flight {
            return Vec::new();
        }

        match self.queue.front() {
            Some(operation) => {
                self.in_flight = true;
                trace!("Dispatching {}", operation);
                vec![Effect::Dispatch(operation.clone())]
            }
            None => {
                if self.state == SessionState::Initializing {
                    info!("Device ready");
                    self.set_state(SessionState::Ready);
                }
                Vec::new()
            }
        }
    }

    fn teardown(&self) -> Effect {
        Effect::Disconnect {
            generation: self.generation,
            report: true,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_operation_id += 1;
        self.next_operation_id
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state != new_state {
            debug!("Session state changed: {} -> {}", self.state, new_state);
            self.state = new_state;
        }
    }
}

/// Decode a value from one of the two service characteristics.
fn decode_value(characteristic: &Uuid, value: &[u8]) -> Option<DeviceEvent> {
    let decoded = if *characteristic == LBS_LED_CHARACTERISTIC_UUID {
        decode_led(value).map(|on| {
            info!("LED {}", if on { "ON" } else { "OFF" });
            DeviceEvent::LedState(on)
        })
    } else if *characteristic == LBS_BUTTON_CHARACTERISTIC_UUID {
        decode_button(value).map(|v| {
            debug!("Button value: {}", v);
            DeviceEvent::ButtonValue(v)
        })
    } else {
        return None;
    };

    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping value from {}: {}", characteristic, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::topology::DiscoveredService;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dispatched(effects: &[Effect]) -> Vec<Operation> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Dispatch(op) => Some(op.clone()),
                _ => None,
            })
            .collect()
    }

    fn notified(effects: &[Effect]) -> Vec<DeviceEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(ev) => Some(*ev),
                _ => None,
            })
            .collect()
    }

    /// Drive a machine up to the point where services have been discovered.
    fn discover(machine: &mut SessionMachine, services: Vec<DiscoveredService>) -> Vec<Effect> {
        let effects = machine.handle(SessionEvent::ConnectRequested {
            address: "C4:3B:12:00:00:01".to_string(),
        });
        let generation = machine.generation();
        assert_eq!(
            effects,
            vec![Effect::Connect {
                address: "C4:3B:12:00:00:01".to_string(),
                generation,
            }]
        );
        assert_eq!(machine.state(), SessionState::Connecting);

        let effects = machine.handle(SessionEvent::Connected { generation });
        assert_eq!(effects, vec![Effect::DiscoverServices { generation }]);
        assert_eq!(machine.state(), SessionState::DiscoveringServices);

        machine.handle(SessionEvent::ServicesDiscovered {
            generation,
            services,
        })
    }

    fn link_lost(machine: &SessionMachine) -> SessionEvent {
        SessionEvent::Disconnected {
            generation: machine.generation(),
        }
    }

    fn teardown(machine: &SessionMachine) -> Effect {
        Effect::Disconnect {
            generation: machine.generation(),
            report: true,
        }
    }

    fn complete(machine: &mut SessionMachine, value: Vec<u8>) -> Vec<Effect> {
        let id = machine.in_flight().expect("operation in flight").id();
        machine.handle(SessionEvent::OperationCompleted {
            operation_id: id,
            outcome: OperationOutcome::Completed(value),
        })
    }

    fn ready_machine() -> SessionMachine {
        let mut machine = SessionMachine::new();
        discover(&mut machine, vec![DiscoveredService::lbs()]);
        complete(&mut machine, vec![0x00]);
        complete(&mut machine, vec![0x00]);
        complete(&mut machine, vec![]);
        assert_eq!(machine.state(), SessionState::Ready);
        machine
    }

    #[test]
    fn test_initialization_order() {
        let mut machine = SessionMachine::new();
        let effects = discover(&mut machine, vec![DiscoveredService::lbs()]);

        assert_eq!(machine.state(), SessionState::Initializing);
        let queued: Vec<_> = machine
            .pending()
            .map(|op| (op.kind(), op.target().uuid))
            .collect();
        assert_eq!(
            queued,
            vec![
                (OperationKind::Read, LBS_LED_CHARACTERISTIC_UUID),
                (OperationKind::Read, LBS_BUTTON_CHARACTERISTIC_UUID),
                (
                    OperationKind::EnableNotifications,
                    LBS_BUTTON_CHARACTERISTIC_UUID
                ),
            ]
        );

        // Only the head goes out.
        let sent = dispatched(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), OperationKind::Read);
        assert_eq!(sent[0].target().uuid, LBS_LED_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_scenario_a_initialization_drains_to_ready() {
        let mut machine = SessionMachine::new();
        discover(&mut machine, vec![DiscoveredService::lbs()]);

        let effects = complete(&mut machine, vec![0x01]);
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(true)]);
        assert_eq!(dispatched(&effects)[0].target().uuid, LBS_BUTTON_CHARACTERISTIC_UUID);
        assert_eq!(machine.state(), SessionState::Initializing);

        let effects = complete(&mut machine, vec![0x00]);
        assert_eq!(notified(&effects), vec![DeviceEvent::ButtonValue(0)]);
        assert_eq!(
            dispatched(&effects)[0].kind(),
            OperationKind::EnableNotifications
        );
        assert_eq!(machine.state(), SessionState::Initializing);

        let effects = complete(&mut machine, vec![]);
        assert!(effects.is_empty());
        assert_eq!(machine.state(), SessionState::Ready);
        assert_eq!(machine.queue_len(), 0);
    }

    #[test]
    fn test_scenario_b_missing_button_rejected() {
        let mut service = DiscoveredService::lbs();
        service
            .characteristics
            .retain(|c| c.uuid != LBS_BUTTON_CHARACTERISTIC_UUID);

        let mut machine = SessionMachine::new();
        let effects = discover(&mut machine, vec![service]);

        assert_eq!(effects, vec![teardown(&machine)]);
        assert_eq!(machine.state(), SessionState::Disconnecting);
        assert_eq!(machine.queue_len(), 0);
        assert!(machine.handles().is_none());

        let effects = machine.handle(link_lost(&machine));
        assert_eq!(notified(&effects), vec![DeviceEvent::Disconnected]);
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_missing_service_and_unwritable_led_rejected() {
        let mut machine = SessionMachine::new();
        assert_eq!(discover(&mut machine, vec![]), vec![teardown(&machine)]);

        let mut service = DiscoveredService::lbs();
        for c in service.characteristics.iter_mut() {
            c.properties.write = false;
        }
        let mut machine = SessionMachine::new();
        assert_eq!(discover(&mut machine, vec![service]), vec![teardown(&machine)]);
    }

    #[test]
    fn test_scenario_c_write_echo_reports_led_on() {
        let mut machine = ready_machine();

        let effects = machine.handle(SessionEvent::WriteRequested { value: 0x01 });
        let sent = dispatched(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), OperationKind::Write);
        assert_eq!(sent[0].payload(), Some(0x01));
        assert_eq!(sent[0].target().uuid, LBS_LED_CHARACTERISTIC_UUID);

        let effects = complete(&mut machine, vec![0x01]);
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(true)]);
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_write_decodes_echo_not_intent() {
        let mut machine = ready_machine();
        machine.handle(SessionEvent::WriteRequested { value: 0x01 });

        // The peripheral stored something else.
        let effects = complete(&mut machine, vec![0x00]);
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(false)]);
    }

    #[test]
    fn test_scenario_d_back_to_back_writes() {
        let mut machine = ready_machine();

        let first = machine.handle(SessionEvent::WriteRequested { value: 0x01 });
        let second = machine.handle(SessionEvent::WriteRequested { value: 0x00 });
        assert_eq!(dispatched(&first).len(), 1);
        // Second write waits behind the first.
        assert!(dispatched(&second).is_empty());
        assert_eq!(machine.queue_len(), 2);

        let effects = complete(&mut machine, vec![0x01]);
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(true)]);
        let next = dispatched(&effects);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload(), Some(0x00));

        let effects = complete(&mut machine, vec![0x00]);
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(false)]);
        assert_eq!(machine.queue_len(), 0);
    }

    #[test]
    fn test_scenario_e_disconnect_mid_initialization() {
        let mut machine = SessionMachine::new();
        discover(&mut machine, vec![DiscoveredService::lbs()]);
        let stale_id = machine.in_flight().unwrap().id();
        complete(&mut machine, vec![0x01]);
        assert_eq!(machine.state(), SessionState::Initializing);

        let effects = machine.handle(link_lost(&machine));
        assert_eq!(effects, vec![Effect::Notify(DeviceEvent::Disconnected)]);
        assert_eq!(machine.state(), SessionState::Disconnected);
        assert_eq!(machine.queue_len(), 0);
        assert!(machine.in_flight().is_none());
        assert!(machine.handles().is_none());

        // A duplicate disconnect must not notify again.
        assert!(machine.handle(link_lost(&machine)).is_empty());

        // Results still in flight are dropped.
        let in_flight_id = stale_id + 1;
        assert!(machine
            .handle(SessionEvent::OperationCompleted {
                operation_id: in_flight_id,
                outcome: OperationOutcome::Completed(vec![0x01]),
            })
            .is_empty());
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_write_dropped_when_not_ready() {
        let mut machine = SessionMachine::new();
        assert!(machine
            .handle(SessionEvent::WriteRequested { value: 1 })
            .is_empty());
        assert_eq!(machine.queue_len(), 0);

        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        assert!(machine
            .handle(SessionEvent::WriteRequested { value: 1 })
            .is_empty());
        assert_eq!(machine.queue_len(), 0);
    }

    #[test]
    fn test_write_while_initializing_is_queued_last() {
        let mut machine = SessionMachine::new();
        discover(&mut machine, vec![DiscoveredService::lbs()]);

        let effects = machine.handle(SessionEvent::WriteRequested { value: 1 });
        assert!(dispatched(&effects).is_empty());
        let kinds: Vec<_> = machine.pending().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Read,
                OperationKind::Read,
                OperationKind::EnableNotifications,
                OperationKind::Write,
            ]
        );

        complete(&mut machine, vec![0]);
        complete(&mut machine, vec![0]);
        complete(&mut machine, vec![]);
        // Queue not empty yet, so still initializing.
        assert_eq!(machine.state(), SessionState::Initializing);
        complete(&mut machine, vec![1]);
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_failed_operation_is_dropped_and_queue_proceeds() {
        let mut machine = SessionMachine::new();
        discover(&mut machine, vec![DiscoveredService::lbs()]);

        let id = machine.in_flight().unwrap().id();
        let effects = machine.handle(SessionEvent::OperationCompleted {
            operation_id: id,
            outcome: OperationOutcome::Failed {
                reason: "GATT error".to_string(),
            },
        });
        assert!(notified(&effects).is_empty());
        let next = dispatched(&effects);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].target().uuid, LBS_BUTTON_CHARACTERISTIC_UUID);
        assert_eq!(machine.queue_len(), 2);
    }

    #[test]
    fn test_mismatched_completion_ignored() {
        let mut machine = ready_machine();
        machine.handle(SessionEvent::WriteRequested { value: 1 });
        let id = machine.in_flight().unwrap().id();

        let effects = machine.handle(SessionEvent::OperationCompleted {
            operation_id: id + 100,
            outcome: OperationOutcome::Completed(vec![1]),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.in_flight().unwrap().id(), id);
    }

    #[test]
    fn test_notifications_decoded_only_with_handles() {
        let mut machine = SessionMachine::new();
        let effects = machine.handle(SessionEvent::Notification {
            characteristic: LBS_BUTTON_CHARACTERISTIC_UUID,
            value: vec![1],
        });
        assert!(effects.is_empty());

        let mut machine = ready_machine();
        let effects = machine.handle(SessionEvent::Notification {
            characteristic: LBS_BUTTON_CHARACTERISTIC_UUID,
            value: vec![1],
        });
        assert_eq!(notified(&effects), vec![DeviceEvent::ButtonValue(1)]);

        let effects = machine.handle(SessionEvent::Notification {
            characteristic: LBS_LED_CHARACTERISTIC_UUID,
            value: vec![0x01],
        });
        assert_eq!(notified(&effects), vec![DeviceEvent::LedState(true)]);

        let effects = machine.handle(SessionEvent::Notification {
            characteristic: LBS_SERVICE_UUID,
            value: vec![1],
        });
        assert!(effects.is_empty());

        // Empty payloads are dropped.
        let effects = machine.handle(SessionEvent::Notification {
            characteristic: LBS_BUTTON_CHARACTERISTIC_UUID,
            value: vec![],
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_connect_failure_surfaces_disconnect() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        let effects = machine.handle(SessionEvent::ConnectFailed {
            generation: machine.generation(),
            reason: "timeout".to_string(),
        });
        assert_eq!(effects, vec![Effect::Notify(DeviceEvent::Disconnected)]);
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_discovery_failure_disconnects() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        let generation = machine.generation();
        machine.handle(SessionEvent::Connected { generation });

        let effects = machine.handle(SessionEvent::DiscoveryFailed {
            generation,
            reason: "GATT error".to_string(),
        });
        assert_eq!(effects, vec![teardown(&machine)]);
        assert_eq!(machine.state(), SessionState::Disconnecting);
    }

    #[test]
    fn test_connect_ignored_unless_disconnected() {
        let mut machine = ready_machine();
        let generation = machine.generation();
        let effects = machine.handle(SessionEvent::ConnectRequested {
            address: "other".to_string(),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.generation(), generation);
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        machine.handle(link_lost(&machine));
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        assert_eq!(machine.generation(), 2);

        assert!(machine
            .handle(SessionEvent::Connected { generation: 1 })
            .is_empty());
        assert_eq!(machine.state(), SessionState::Connecting);
    }

    #[test]
    fn test_disconnect_request_then_event() {
        let mut machine = ready_machine();
        machine.handle(SessionEvent::WriteRequested { value: 1 });

        let effects = machine.handle(SessionEvent::DisconnectRequested);
        assert_eq!(effects, vec![teardown(&machine)]);
        assert_eq!(machine.state(), SessionState::Disconnecting);

        // No new writes once disconnecting.
        assert!(machine
            .handle(SessionEvent::WriteRequested { value: 0 })
            .is_empty());

        // Repeated requests are idempotent.
        assert!(machine.handle(SessionEvent::DisconnectRequested).is_empty());

        let effects = machine.handle(link_lost(&machine));
        assert_eq!(effects, vec![Effect::Notify(DeviceEvent::Disconnected)]);
        assert_eq!(machine.queue_len(), 0);
    }

    #[test]
    fn test_connect_completing_after_cancel_is_torn_down() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        let generation = machine.generation();
        machine.handle(SessionEvent::DisconnectRequested);
        machine.handle(link_lost(&machine));

        let effects = machine.handle(SessionEvent::Connected { generation });
        assert_eq!(
            effects,
            vec![Effect::Disconnect {
                generation,
                report: false,
            }]
        );
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_connect_landing_while_disconnecting_is_torn_down_quietly() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        let generation = machine.generation();
        machine.handle(SessionEvent::DisconnectRequested);

        let effects = machine.handle(SessionEvent::Connected { generation });
        assert_eq!(
            effects,
            vec![Effect::Disconnect {
                generation,
                report: false,
            }]
        );
        assert_eq!(machine.state(), SessionState::Disconnecting);
    }

    #[test]
    fn test_disconnect_of_previous_lifecycle_ignored() {
        let mut machine = SessionMachine::new();
        machine.handle(SessionEvent::ConnectRequested {
            address: "dev".to_string(),
        });
        let first = machine.generation();
        machine.handle(SessionEvent::DisconnectRequested);
        machine.handle(link_lost(&machine));

        let effects = discover(&mut machine, vec![DiscoveredService::lbs()]);
        assert_eq!(dispatched(&effects).len(), 1);
        assert_ne!(machine.generation(), first);

        // A late teardown result from the first attempt lands in the new session.
        let effects = machine.handle(SessionEvent::Disconnected { generation: first });
        assert!(effects.is_empty());
        assert_eq!(machine.state(), SessionState::Initializing);
        assert!(machine.handles().is_some());
        assert_eq!(machine.queue_len(), 3);
    }

    #[test]
    fn test_reconnect_rebuilds_handles_and_initialization() {
        let mut machine = ready_machine();
        let first = machine.handles().unwrap().clone();
        machine.handle(link_lost(&machine));

        let effects = discover(&mut machine, vec![DiscoveredService::lbs()]);
        let second = machine.handles().unwrap();
        assert_ne!(first.generation, second.generation);
        assert_eq!(second.led.generation, machine.generation());
        assert_eq!(machine.queue_len(), 3);
        assert_eq!(dispatched(&effects).len(), 1);
    }

    #[test]
    fn test_enqueue_initialization_requires_validating_state() {
        let mut machine = ready_machine();
        let handles = machine.handles().unwrap().clone();
        assert!(machine.enqueue_initialization(handles).is_empty());
        assert_eq!(machine.queue_len(), 0);
    }

    proptest! {
        #[test]
        fn writes_dispatch_in_fifo_order(values in proptest::collection::vec(any::<u8>(), 1..20)) {
            let mut machine = ready_machine();
            let mut sent = Vec::new();

            for value in &values {
                let effects = machine.handle(SessionEvent::WriteRequested { value: *value });
                sent.extend(dispatched(&effects));
            }
            prop_assert_eq!(machine.queue_len(), values.len());

            while let Some(op) = machine.in_flight().cloned() {
                let echo = vec![op.payload().unwrap_or_default()];
                let effects = machine.handle(SessionEvent::OperationCompleted {
                    operation_id: op.id(),
                    outcome: OperationOutcome::Completed(echo),
                });
                sent.extend(dispatched(&effects));
            }

            let payloads: Vec<u8> = sent.iter().filter_map(Operation::payload).collect();
            prop_assert_eq!(payloads, values);
            prop_assert_eq!(machine.state(), SessionState::Ready);
        }

        #[test]
        fn disconnect_always_resets(steps in 0usize..4, writes in 0usize..5) {
            let mut machine = SessionMachine::new();
            discover(&mut machine, vec![DiscoveredService::lbs()]);
            for _ in 0..steps.min(3) {
                complete(&mut machine, vec![0]);
            }
            for _ in 0..writes {
                machine.handle(SessionEvent::WriteRequested { value: 1 });
            }

            let effects = machine.handle(link_lost(&machine));
            prop_assert_eq!(effects, vec![Effect::Notify(DeviceEvent::Disconnected)]);
            prop_assert_eq!(machine.state(), SessionState::Disconnected);
            prop_assert_eq!(machine.queue_len(), 0);
            prop_assert!(machine.handles().is_none());
        }

        #[test]
        fn led_decoding_matches_across_paths(byte in any::<u8>()) {
            let expected = vec![DeviceEvent::LedState(byte == 0x01)];

            let mut machine = ready_machine();
            machine.handle(SessionEvent::WriteRequested { value: byte });
            let via_write = notified(&complete(&mut machine, vec![byte]));

            let via_notify = notified(&machine.handle(SessionEvent::Notification {
                characteristic: LBS_LED_CHARACTERISTIC_UUID,
                value: vec![byte],
            }));

            let mut machine = SessionMachine::new();
            discover(&mut machine, vec![DiscoveredService::lbs()]);
            let via_read = notified(&complete(&mut machine, vec![byte]));

            prop_assert_eq!(&via_write, &expected);
            prop_assert_eq!(&via_notify, &expected);
            prop_assert_eq!(&via_read, &expected);
        }
    }
}
