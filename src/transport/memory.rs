//! In-memory transport.
//!
//! [`memory_transport`] returns a connected pair: the [`MemoryTransport`]
//! goes to the connection, the [`MemoryPeer`] plays the gateway. Inbound
//! events are queued on the peer side; outbound messages and connect
//! endpoints are recorded for inspection.
//!
//! # Example
//!
//! ```ignore
//! use gatewire::transport::{memory_transport, Transport, TransportEvent};
//!
//! let (mut transport, mut peer) = memory_transport();
//! transport.connect("wss://gateway.example").await?;
//!
//! peer.push_text("{\"op\":11}");
//! let event = transport.poll(Duration::from_millis(10)).await?;
//! assert!(matches!(event, TransportEvent::Fragment { is_final: true, .. }));
//!
//! assert_eq!(peer.connect_endpoints(), vec!["wss://gateway.example"]);
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Transport, TransportEvent};
use crate::codec::EnvelopeCodec;
use crate::error::{GatewayError, Result};
use crate::protocol::{close_code, Envelope};

/// Create a transport and the peer that drives it.
pub fn memory_transport() -> (MemoryTransport, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (connects_tx, connects_rx) = mpsc::unbounded_channel();
    let (results_tx, results_rx) = mpsc::unbounded_channel();

    (
        MemoryTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            connects: connects_tx,
            connect_results: results_rx,
            open: false,
            closing: false,
        },
        MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            connects: connects_rx,
            connect_results: results_tx,
        },
    )
}

/// Connection half of an in-memory transport.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Result<TransportEvent>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    connects: mpsc::UnboundedSender<String>,
    connect_results: mpsc::UnboundedReceiver<Result<()>>,
    open: bool,
    /// Set by `close()`; the next poll answers with a normal close.
    closing: bool,
}

impl MemoryTransport {
    /// Check if the transport is connected.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Transport for MemoryTransport {
    async fn connect(&mut self, endpoint: &str) -> Result<()> {
        let _ = self.connects.send(endpoint.to_string());

        if let Ok(Err(e)) = self.connect_results.try_recv() {
            self.open = false;
            return Err(e);
        }

        self.open = true;
        self.closing = false;
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        if !self.open || self.closing {
            return Err(GatewayError::Network("memory transport is not connected".into()));
        }
        self.outbound
            .send(data)
            .map_err(|_| GatewayError::Network("memory peer dropped".into()))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        if self.closing {
            self.closing = false;
            self.open = false;
            return Ok(TransportEvent::Closed {
                code: Some(close_code::NORMAL),
            });
        }
        if !self.open {
            return Ok(TransportEvent::Closed { code: None });
        }

        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, Ok(TransportEvent::Closed { .. })) {
                    self.open = false;
                }
                event
            }
            Ok(None) => {
                self.open = false;
                Ok(TransportEvent::Closed { code: None })
            }
            Err(_) => Ok(TransportEvent::Idle),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.closing = true;
        }
        Ok(())
    }
}

/// Gateway half of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Result<TransportEvent>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    connects: mpsc::UnboundedReceiver<String>,
    connect_results: mpsc::UnboundedSender<Result<()>>,
}

impl MemoryPeer {
    /// Queue a complete message.
    pub fn push_text(&self, text: impl Into<Bytes>) {
        self.push_fragment(text, true);
    }

    /// Queue one fragment of a message.
    pub fn push_fragment(&self, data: impl Into<Bytes>, is_final: bool) {
        self.push_event(Ok(TransportEvent::Fragment {
            data: data.into(),
            is_final,
        }));
    }

    /// Queue a close.
    pub fn push_close(&self, code: Option<u16>) {
        self.push_event(Ok(TransportEvent::Closed { code }));
    }

    /// Queue a transport error.
    pub fn push_error(&self, error: GatewayError) {
        self.push_event(Err(error));
    }

    fn push_event(&self, event: Result<TransportEvent>) {
        let _ = self.inbound.send(event);
    }

    /// Make the next `connect()` fail with `error`.
    pub fn fail_next_connect(&self, error: GatewayError) {
        let _ = self.connect_results.send(Err(error));
    }

    /// Take the next message the connection sent.
    pub fn try_recv_sent(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Drain and decode everything the connection sent.
    pub fn sent_envelopes(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(bytes) = self.try_recv_sent() {
            match EnvelopeCodec::decode(bytes) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => tracing::warn!("Undecodable outbound message: {}", e),
            }
        }
        envelopes
    }

    /// Drain the endpoints passed to `connect()`, oldest first.
    pub fn connect_endpoints(&mut self) -> Vec<String> {
        let mut endpoints = Vec::new();
        while let Ok(endpoint) = self.connects.try_recv() {
            endpoints.push(endpoint);
        }
        endpoints
    }
}
