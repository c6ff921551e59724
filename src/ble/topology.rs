//! GATT topology validation.
//!
//! Checks that a connected peripheral exposes the LED Button Service with
//! both of its characteristics before any operation is queued against it.

use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Property flags of a discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    /// Supports read requests.
    pub read: bool,
    /// Supports write requests (with response).
    pub write: bool,
    /// Supports notifications.
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Read + write, the LED characteristic profile.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        notify: false,
    };

    /// Read + notify, the button characteristic profile.
    pub const READ_NOTIFY: Self = Self {
        read: true,
        write: false,
        notify: true,
    };
}

/// Reference to a characteristic discovered on the current connection.
///
/// Handles are scoped to one connection lifecycle (`generation`) and must be
/// rediscovered after every reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Supported properties.
    pub properties: CharacteristicProperties,
    /// Connection lifecycle this handle was discovered in.
    pub generation: u64,
}

impl CharacteristicHandle {
    /// Create a new characteristic handle.
    pub fn new(
        uuid: Uuid,
        service_uuid: Uuid,
        properties: CharacteristicProperties,
        generation: u64,
    ) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
            generation,
        }
    }
}

/// A service as reported by transport service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// A characteristic as reported by transport service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Supported properties.
    pub properties: CharacteristicProperties,
}

impl DiscoveredService {
    /// Find a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }

    /// Fixture: the discovery result of a conforming LED Button Service
    /// peripheral (button read/notify, LED read/write).
    ///
    /// For tests and custom [`Transport`](crate::ble::Transport)
    /// implementations that simulate a peripheral.
    pub fn lbs() -> Self {
        Self {
            uuid: LBS_SERVICE_UUID,
            characteristics: vec![
                DiscoveredCharacteristic {
                    uuid: LBS_BUTTON_CHARACTERISTIC_UUID,
                    properties: CharacteristicProperties::READ_NOTIFY,
                },
                DiscoveredCharacteristic {
                    uuid: LBS_LED_CHARACTERISTIC_UUID,
                    properties: CharacteristicProperties::READ_WRITE,
                },
            ],
        }
    }
}

/// The validated button/LED handle pair for one connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSet {
    /// Button characteristic.
    pub button: CharacteristicHandle,
    /// LED characteristic.
    pub led: CharacteristicHandle,
    /// Connection lifecycle both handles belong to.
    pub generation: u64,
}

impl HandleSet {
    /// Return the handle with the given UUID, if it is one of ours.
    pub fn by_uuid(&self, uuid: &Uuid) -> Option<&CharacteristicHandle> {
        if self.button.uuid == *uuid {
            Some(&self.button)
        } else if self.led.uuid == *uuid {
            Some(&self.led)
        } else {
            None
        }
    }
}

/// Validate discovered services against the LED Button Service schema.
///
/// # Errors
///
/// - [`Error::ServiceNotFound`] if the service is absent.
/// - [`Error::CharacteristicNotFound`] if the button or LED characteristic is absent.
/// - [`Error::CharacteristicNotWritable`] if the LED characteristic lacks the write property.
pub fn validate_topology(services: &[DiscoveredService], generation: u64) -> Result<HandleSet> {
    let service = services
        .iter()
        .find(|s| is_lbs_service(&s.uuid))
        .ok_or_else(|| Error::ServiceNotFound {
            uuid: LBS_SERVICE_UUID.to_string(),
        })?;

    let button = service
        .characteristic(&LBS_BUTTON_CHARACTERISTIC_UUID)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: LBS_BUTTON_CHARACTERISTIC_UUID.to_string(),
        })?;

    let led = service
        .characteristic(&LBS_LED_CHARACTERISTIC_UUID)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: LBS_LED_CHARACTERISTIC_UUID.to_string(),
        })?;

    if !led.properties.write {
        return Err(Error::CharacteristicNotWritable {
            uuid: LBS_LED_CHARACTERISTIC_UUID.to_string(),
        });
    }

    Ok(HandleSet {
        button: CharacteristicHandle::new(button.uuid, service.uuid, button.properties, generation),
        led: CharacteristicHandle::new(led.uuid, service.uuid, led.properties, generation),
        generation,
    })
}
