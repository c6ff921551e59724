//! LED Button Service payload encoding and decoding.
//!
//! Both characteristics carry a single unsigned byte. Longer payloads are
//! decoded from their first byte.

use crate::error::{Error, Result};

/// LED characteristic value for "on".
pub const LED_ON: u8 = 0x01;
/// LED characteristic value for "off".
pub const LED_OFF: u8 = 0x00;

/// Encode an LED on/off command.
#[inline]
pub fn encode_led(on: bool) -> u8 {
    if on {
        LED_ON
    } else {
        LED_OFF
    }
}

/// Decode an LED characteristic value.
///
/// Only `0x01` means on. Every other byte means off.
pub fn decode_led(data: &[u8]) -> Result<bool> {
    first_byte(data, "LED").map(|b| b == LED_ON)
}

/// Decode a button characteristic value.
///
/// The byte is an application-defined reading and is passed through as-is.
pub fn decode_button(data: &[u8]) -> Result<u8> {
    first_byte(data, "button")
}

fn first_byte(data: &[u8], what: &str) -> Result<u8> {
    data.first().copied().ok_or_else(|| Error::InvalidData {
        context: format!("Empty {} payload", what),
    })
}
