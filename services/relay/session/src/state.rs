//! Connection state, session identity and per-session counters.

use std::fmt;
use std::time::{Duration, Instant};

/// Identity of one connection attempt; a new one is minted for every reconnect
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of the active session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live connection
    #[default]
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Connected, input forwarding attached
    Open,
    /// Close frame sent, waiting for the close event
    Closing,
}

impl ConnectionState {
    /// Whether a graceful close can still be issued in this state
    pub fn is_connectable(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Messages written to the output
    pub messages_in: u64,
    /// Messages sent to the socket
    pub messages_out: u64,
    /// Input chunks dropped because the session was not open
    pub inputs_dropped: u64,
    /// When the session reached `Open`
    pub opened_at: Option<Instant>,
}

impl SessionStats {
    /// Time spent open, if the session ever opened
    pub fn uptime(&self) -> Option<Duration> {
        self.opened_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectable_states() {
        assert!(ConnectionState::Connecting.is_connectable());
        assert!(ConnectionState::Open.is_connectable());
        assert!(!ConnectionState::Closing.is_connectable());
        assert!(!ConnectionState::Disconnected.is_connectable());
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(7).to_string(), "#7");
    }
}
