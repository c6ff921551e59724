//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants of the Nordic LED Button Service.

use uuid::Uuid;

// LED Button Service (Nordic Custom)
/// LED Button Service UUID.
pub const LBS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1523_1212_efde_1523_785feabcd123);
/// Button characteristic UUID (Read, Notify).
pub const LBS_BUTTON_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1524_1212_efde_1523_785feabcd123);
/// LED characteristic UUID (Read, Write).
pub const LBS_LED_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1525_1212_efde_1523_785feabcd123);

/// Check if a service UUID is the LED Button Service.
pub fn is_lbs_service(uuid: &Uuid) -> bool {
    *uuid == LBS_SERVICE_UUID
}

/// Check if a characteristic UUID belongs to the LED Button Service.
pub fn is_lbs_characteristic(uuid: &Uuid) -> bool {
    *uuid == LBS_BUTTON_CHARACTERISTIC_UUID || *uuid == LBS_LED_CHARACTERISTIC_UUID
}
