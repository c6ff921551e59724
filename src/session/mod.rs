//! GATT session core.
//!
//! This module holds the operation queue and the lifecycle state machine
//! that sequences GATT operations against a single peripheral.

pub mod machine;
pub mod operation;
pub mod state;

pub use machine::{Effect, SessionEvent, SessionMachine};
pub use operation::{Operation, OperationKind, OperationOutcome};
pub use state::SessionState;
