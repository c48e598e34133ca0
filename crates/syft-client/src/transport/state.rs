//! Connection lifecycle states.

/// State of the real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket and nothing scheduled.
    Disconnected,
    /// A socket open is in flight.
    Connecting,
    /// Socket open; messages go straight out.
    Connected,
    /// Waiting for the backoff timer before the next open.
    Reconnecting,
    /// Gave up. Only an explicit `connect()` leaves this state.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

impl ConnectionState {
    /// Whether a connect attempt is already underway or done.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}
