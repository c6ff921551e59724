//! BLE communication module.
//!
//! This module provides the transport abstraction, its `btleplug`
//! implementation and the GATT topology checks for the LED Button Service.

pub mod platform;
pub mod topology;
pub mod transport;
pub mod uuids;

pub use platform::BtleplugTransport;
pub use topology::{
    validate_topology, CharacteristicHandle, CharacteristicProperties, DiscoveredCharacteristic,
    DiscoveredService, HandleSet,
};
pub use transport::{Transport, TransportEvent};
pub use uuids::*;
