//! Transport module - the boundary to the message-framed connection.
//!
//! The connection state machine only needs four operations from the
//! environment; [`Transport`] captures them. Two adapters are provided:
//! - [`MemoryTransport`] - in-process, scripted through a [`MemoryPeer`]
//! - `WebSocketTransport` - `tokio-tungstenite` client (feature `websocket`)

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use memory::{memory_transport, MemoryPeer, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Outcome of one transport poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Part of an inbound message. `is_final` marks its last fragment.
    Fragment {
        /// Fragment bytes.
        data: Bytes,
        /// Last fragment of the message.
        is_final: bool,
    },
    /// Nothing arrived within the timeout.
    Idle,
    /// The peer closed the connection.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
    },
}

/// A message-framed, bidirectional connection.
///
/// Implementations own everything below the message layer (TLS, DNS,
/// socket lifecycle). Errors are reported as `GatewayError::Network`.
pub trait Transport: Send {
    /// Open a connection to `endpoint`, replacing any previous one.
    fn connect(&mut self, endpoint: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send one complete outbound message.
    fn send(&mut self, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `timeout` for the next inbound event.
    fn poll(&mut self, timeout: Duration) -> impl Future<Output = Result<TransportEvent>> + Send;

    /// Start a graceful close. Later polls report the peer's `Closed`.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
