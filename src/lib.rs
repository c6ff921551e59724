//! # blinky-ble
//!
//! A Rust library for driving a Nordic LED Button Service ("Blinky")
//! peripheral over Bluetooth Low Energy.
//!
//! The peripheral exposes one custom service with two characteristics: an
//! LED that can be read and written, and a button that can be read and
//! notifies on change. This crate validates that topology on every
//! connection, sequences GATT operations one at a time through an ordered
//! queue, and reports decoded LED and button values to the application.
//!
//! ## Features
//!
//! - **Topology Validation**: Rejects peripherals that lack the service, a
//!   characteristic, or a writable LED
//! - **Ordered Operation Queue**: Exactly one GATT operation in flight, FIFO
//! - **Initialization Sequence**: Reads the LED, reads the button, then
//!   subscribes to button notifications
//! - **Typed Events**: LED state, button readings and disconnection via
//!   broadcast channels or callbacks
//! - **Pluggable Transport**: `btleplug` by default, any [`ble::Transport`]
//!   for tests or other stacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blinky_ble::{Blinky, DeviceEvent, Result, SessionConfig, SessionState};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let blinky = Blinky::new(SessionConfig::default()).await?;
//!     let mut events = blinky.subscribe_events();
//!
//!     blinky.connect("C4:3B:12:34:56:78").await?;
//!     blinky
//!         .wait_for_state(SessionState::Ready, Duration::from_secs(15))
//!         .await?;
//!
//!     blinky.set_led(true).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::ButtonValue(value) => println!("Button: {}", value),
//!             DeviceEvent::LedState(on) => println!("LED on: {}", on),
//!             DeviceEvent::Disconnected => break,
//!         }
//!     }
//!
//!     blinky.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Peripherals have no visible address on
//! macOS, so connect by advertised name instead.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod blinky;
pub mod config;
pub mod error;
pub mod notifier;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use blinky::Blinky;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use notifier::{CallbackHandle, DeviceEvent, DeviceSnapshot, EventNotifier};
pub use session::{
    Effect, Operation, OperationKind, OperationOutcome, SessionEvent, SessionMachine,
    SessionState,
};

// Re-export commonly used types from submodules
pub use ble::{
    BtleplugTransport, DiscoveredService, HandleSet, Transport, TransportEvent,
    LBS_BUTTON_CHARACTERISTIC_UUID, LBS_LED_CHARACTERISTIC_UUID, LBS_SERVICE_UUID,
};
