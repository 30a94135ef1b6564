//! WebSocket transport over `tokio-tungstenite`.
//!
//! tungstenite reassembles continuation frames itself, so every text or
//! binary message is surfaced as one final fragment. Ping/pong is answered
//! by tungstenite and never reaches the connection.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Transport, TransportEvent};
use crate::error::{GatewayError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport (TLS via rustls with webpki roots).
#[derive(Default)]
pub struct WebSocketTransport {
    stream: Option<WsStream>,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a socket is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

fn network(context: &str, e: WsError) -> GatewayError {
    GatewayError::Network(format!("{}: {}", context, e))
}

impl Transport for WebSocketTransport {
    async fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.stream = None;
        let (stream, _response) = connect_async(endpoint)
            .await
            .map_err(|e| network("WebSocket connect failed", e))?;
        tracing::debug!(endpoint, "WebSocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::Network("WebSocket is not connected".into()))?;
        let text = String::from_utf8(data.to_vec())
            .map_err(|_| GatewayError::InvalidParam("outbound message is not UTF-8".into()))?;

        stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| network("WebSocket send failed", e))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        let deadline = Instant::now() + timeout;

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(TransportEvent::Closed { code: None });
            };

            let next = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(TransportEvent::Idle),
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(TransportEvent::Fragment {
                        data: Bytes::copy_from_slice(text.as_str().as_bytes()),
                        is_final: true,
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(TransportEvent::Fragment {
                        data,
                        is_final: true,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    tracing::debug!(?code, "WebSocket close frame received");
                    return Ok(TransportEvent::Closed { code });
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.stream = None;
                    return Ok(TransportEvent::Closed { code: None });
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(network("WebSocket receive failed", e));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        match stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => {
                self.stream = None;
                Err(network("WebSocket close failed", e))
            }
        }
    }
}
