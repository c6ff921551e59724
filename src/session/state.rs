//! Session lifecycle states.

/// Lifecycle state of the session with the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Not connected to the device.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected, waiting for service discovery.
    DiscoveringServices,
    /// Checking the discovered services against the expected topology.
    ValidatingTopology,
    /// Draining the initialization queue.
    Initializing,
    /// Initialized; LED writes are accepted.
    Ready,
    /// Currently disconnecting.
    Disconnecting,
}

impl SessionState {
    /// Check if the session is ready for application commands.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a link to the peripheral is (or is being) held.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::DiscoveringServices | Self::ValidatingTopology | Self::Initializing | Self::Ready
        )
    }

    /// Check if LED writes are accepted in this state.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::Initializing | Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::ValidatingTopology => write!(f, "ValidatingTopology"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}
