//! Connection lifecycle state

use std::fmt;

/// Lifecycle of the client's connection
///
/// `Closed` is terminal: once entered, no other state is ever published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection yet
    Disconnected,
    /// Dialing and negotiating a session
    Connecting,
    /// Session negotiated, login in progress
    Authenticating,
    /// Accepting calls
    Ready,
    /// Shut down
    Closed,
}

impl ConnectionState {
    /// True for `Closed`
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// True while a connection is being (re)established
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::Connecting
                | ConnectionState::Authenticating
        )
    }

    /// Lowercase state name
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
