//! Session configuration.

use std::time::Duration;

/// Timeouts and channel sizes for a [`crate::Blinky`] session.
///
/// Protocol constants (UUIDs, payload width) are fixed and not configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long to scan for the requested peripheral before giving up.
    pub scan_timeout: Duration,
    /// Maximum time for the transport to establish the link.
    pub connect_timeout: Duration,
    /// Maximum time for service discovery.
    pub discovery_timeout: Duration,
    /// Maximum time for one GATT operation. A timed-out operation counts as failed.
    pub operation_timeout: Duration,
    /// Maximum time for the transport to tear down the link.
    pub disconnect_timeout: Duration,
    /// Capacity of the application event channel.
    pub event_capacity: usize,
    /// Capacity of the application command channel.
    pub command_capacity: usize,
}

impl SessionConfig {
    /// Default scan timeout (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default connect timeout (10 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default discovery timeout (10 seconds).
    pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default operation timeout (5 seconds).
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default disconnect timeout (5 seconds).
    pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the disconnect timeout.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set the application event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the application command channel capacity.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: Self::DEFAULT_DISCOVERY_TIMEOUT,
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
            disconnect_timeout: Self::DEFAULT_DISCONNECT_TIMEOUT,
            event_capacity: 64,
            command_capacity: 32,
        }
    }
}
