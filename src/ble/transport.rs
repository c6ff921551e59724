//! Transport abstraction over the platform BLE stack.
//!
//! The session core never talks to a radio directly. It drives a
//! [`Transport`], which owns the link to one peripheral and executes one
//! GATT operation at a time.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ble::topology::DiscoveredService;
use crate::error::Result;
use crate::session::Operation;

/// Unsolicited event pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A subscribed characteristic sent a value.
    Notification {
        /// UUID of the characteristic that notified.
        characteristic: Uuid,
        /// The notification data.
        value: Vec<u8>,
    },
    /// The link to the peripheral dropped.
    Disconnected,
}

/// Capability interface to a BLE stack for a single peripheral.
///
/// Callers must not issue a second `dispatch` before the previous one has
/// returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the peripheral with the given address or advertised name.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Discover services on the connected peripheral.
    async fn discover_services(&self) -> Result<Vec<DiscoveredService>>;

    /// Execute one GATT operation.
    ///
    /// Reads return the value read, writes return the bytes written and
    /// notification subscriptions return an empty vector.
    async fn dispatch(&self, operation: &Operation) -> Result<Vec<u8>>;

    /// Tear down the link.
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to notifications and link loss.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}
