//! # gatewire
//!
//! Client core for a real-time gateway protocol (Discord gateway v10, JSON
//! encoding).
//!
//! One [`Connection`] keeps a persistent message-framed connection alive:
//! it reassembles fragmented frames, decodes envelopes, sends heartbeats,
//! and reconnects or resumes when the gateway asks for it or goes quiet.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): `connect/send/poll/close` boundary, with
//!   WebSocket and in-memory adapters
//! - **Protocol** ([`protocol`]): wire constants, envelopes, fragment reassembly
//! - **Codec** ([`codec`]): byte-cursor scanner and envelope encoding
//! - **Connection** ([`connection`]): the state machine, driven by `poll()`
//! - **Dispatch** ([`dispatch`]): bounded queue of dispatch events for the application
//!
//! ## Example
//!
//! ```ignore
//! use gatewire::transport::WebSocketTransport;
//! use gatewire::{ConnectionBuilder, GatewayError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GatewayError> {
//!     let (mut connection, mut events) = ConnectionBuilder::new("my-token")
//!         .build(WebSocketTransport::new())?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{:?} #{:?}", event.event_name(), event.sequence);
//!         }
//!     });
//!
//!     connection.connect().await?;
//!     loop {
//!         match connection.poll(Duration::from_millis(250)).await {
//!             Ok(_) | Err(GatewayError::Timeout) => {}
//!             Err(e) if e.is_terminal() => return Err(e),
//!             Err(e) => tracing::warn!("{}", e),
//!         }
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{ClientProperties, ConnectionBuilder, GatewayConfig};
pub use connection::{CloseDisposition, Connection, ConnectionState};
pub use dispatch::DispatchReceiver;
pub use error::{GatewayError, Result};
pub use heartbeat::HeartbeatScheduler;
pub use protocol::Envelope;
pub use session::{SessionIdentity, SessionManager};
