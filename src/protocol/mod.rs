//! Protocol module for encoding and decoding characteristic values.
//!
//! This module contains the implementations for:
//! - LED state encoding/decoding
//! - Button value decoding

pub mod lbs;

pub use lbs::{decode_button, decode_led, encode_led, LED_OFF, LED_ON};
