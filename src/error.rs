//! Error types for gatewire.

use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller contract violation (bad token, wrong state, bad option).
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Transport failure. The connection state machine decides whether to
    /// reconnect.
    #[error("Network error: {0}")]
    Network(String),

    /// Envelope or payload could not be decoded. The message is dropped,
    /// the connection is kept.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Allocation failed while growing or copying a buffer.
    #[error("Out of memory: failed to reserve {requested} bytes")]
    OutOfMemory {
        /// Total size that could not be reserved.
        requested: usize,
    },

    /// No complete message arrived within the poll window.
    #[error("Timed out waiting for a message")]
    Timeout,

    /// The gateway closed the connection because the token was rejected.
    #[error("Authentication failed (close code {code})")]
    Authentication {
        /// Close code sent by the gateway.
        code: u16,
    },

    /// The gateway closed the connection for a reason a retry cannot fix
    /// (invalid shard, API version or intents).
    #[error("Connection rejected by gateway (close code {code})")]
    Rejected {
        /// Close code sent by the gateway.
        code: u16,
    },

    /// JSON serialization error (outbound envelopes only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether polling again may make progress.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Timeout | GatewayError::Malformed(_)
        )
    }

    /// Whether the connection can never recover from this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewayError::Authentication { .. } | GatewayError::Rejected { .. }
        )
    }
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GatewayError::Timeout.is_retriable());
        assert!(GatewayError::Network("reset".into()).is_retriable());
        assert!(!GatewayError::InvalidParam("token".into()).is_retriable());
        assert!(GatewayError::Authentication { code: 4004 }.is_terminal());
        assert!(GatewayError::Rejected { code: 4013 }.is_terminal());
        assert!(!GatewayError::Timeout.is_terminal());
    }

    #[test]
    fn test_display() {
        let err = GatewayError::OutOfMemory { requested: 128 };
        assert_eq!(err.to_string(), "Out of memory: failed to reserve 128 bytes");
    }
}
