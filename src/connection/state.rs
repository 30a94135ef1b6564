//! Connection states and close-code classification.

use std::fmt;

use crate::protocol::close_code;

/// Lifecycle state of a gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected. `connect()` is allowed.
    Disconnected,
    /// About to open a fresh connection (identify).
    Connecting,
    /// Transport open, handshake not yet sent.
    Connected,
    /// Identify or resume sent, waiting for READY/RESUMED.
    Identifying,
    /// Session established.
    Ready,
    /// Connection lost or abandoned; the next poll reconnects.
    Reconnecting,
    /// `close()` in progress.
    Closing,
    /// Terminal failure. A new connection is required.
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Identifying => "identifying",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
        }
    }

    /// Check if the transport is up and heartbeats are flowing.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Identifying | ConnectionState::Ready)
    }

    /// Check if the next poll opens a new transport connection.
    pub fn needs_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a gateway close code means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Token rejected. Terminal.
    Authentication,
    /// Configuration rejected (shard, API version, intents). Terminal.
    Rejected,
    /// Session unusable; reconnect with a fresh identify.
    ReconnectFresh,
    /// Reconnect, resuming if a session is held.
    Reconnect,
}

impl CloseDisposition {
    /// Classify a close code.
    pub fn classify(code: u16) -> Self {
        match code {
            close_code::AUTHENTICATION_FAILED => CloseDisposition::Authentication,
            close_code::INVALID_SHARD..=close_code::DISALLOWED_INTENTS => CloseDisposition::Rejected,
            close_code::INVALID_SEQUENCE | close_code::SESSION_TIMED_OUT => {
                CloseDisposition::ReconnectFresh
            }
            _ => CloseDisposition::Reconnect,
        }
    }

    /// Check if no reconnect should be attempted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CloseDisposition::Authentication | CloseDisposition::Rejected
        )
    }
}
