//! Error types for the blinky-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral matching the requested address was seen while scanning.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address or name that was searched for.
        address: String,
    },

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The LED Button Service is missing from the discovered services.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// A required characteristic is missing from the LED Button Service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The LED characteristic does not support write requests.
    #[error("Characteristic not writable: {uuid}")]
    CharacteristicNotWritable {
        /// The UUID of the characteristic lacking the write property.
        uuid: String,
    },

    /// The transport reported a failure for a single queued GATT operation.
    #[error("GATT operation failed: {reason}")]
    OperationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The link dropped without the application asking for it.
    #[error("Unexpected disconnect")]
    UnexpectedDisconnect,

    /// Invalid data was received from the device.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A transport call did not finish within its configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The session driver task has stopped and no longer accepts commands.
    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    /// Whether this error is one of the topology rejections that are fatal
    /// to a connection attempt.
    pub fn is_topology_rejection(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::CharacteristicNotWritable { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
