//! Queued GATT operations.

use crate::ble::topology::CharacteristicHandle;
use crate::error::Result;

/// Kind of a queued GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read the characteristic value.
    Read,
    /// Write a single byte with response.
    Write,
    /// Enable notifications on the characteristic.
    EnableNotifications,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "Read"),
            Self::Write => write!(f, "Write"),
            Self::EnableNotifications => write!(f, "EnableNotifications"),
        }
    }
}

/// A single pending GATT action.
///
/// Operations are never mutated after creation. The `id` is unique per
/// session machine and is how a completion is matched to the in-flight
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    id: u64,
    kind: OperationKind,
    target: CharacteristicHandle,
    payload: Option<u8>,
}

impl Operation {
    pub(crate) fn read(id: u64, target: CharacteristicHandle) -> Self {
        Self {
            id,
            kind: OperationKind::Read,
            target,
            payload: None,
        }
    }

    pub(crate) fn write(id: u64, target: CharacteristicHandle, value: u8) -> Self {
        Self {
            id,
            kind: OperationKind::Write,
            target,
            payload: Some(value),
        }
    }

    pub(crate) fn enable_notifications(id: u64, target: CharacteristicHandle) -> Self {
        Self {
            id,
            kind: OperationKind::EnableNotifications,
            target,
            payload: None,
        }
    }

    /// Operation identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Target characteristic.
    pub fn target(&self) -> &CharacteristicHandle {
        &self.target
    }

    /// The byte to write. Only present for [`OperationKind::Write`].
    pub fn payload(&self) -> Option<u8> {
        self.payload
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.payload {
            Some(value) => write!(
                f,
                "#{} {}({}, {:#04x})",
                self.id, self.kind, self.target.uuid, value
            ),
            None => write!(f, "#{} {}({})", self.id, self.kind, self.target.uuid),
        }
    }
}

/// How the transport finished an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Finished successfully. Holds the value read, the echoed write payload,
    /// or nothing for a notification subscription.
    Completed(Vec<u8>),
    /// The transport reported a failure.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

impl From<Result<Vec<u8>>> for OperationOutcome {
    fn from(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}
