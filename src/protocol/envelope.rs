//! Envelope struct with typed accessors.
//!
//! Represents one decoded gateway message. The payload (`d`) is kept as the
//! raw JSON span of the received message, shared zero-copy through
//! `bytes::Bytes`; callers that need sub-fields run the scanner over it.
//!
//! # Example
//!
//! ```
//! use gatewire::protocol::{opcode, Envelope};
//! use bytes::Bytes;
//!
//! let envelope = Envelope::new(opcode::HEARTBEAT, Bytes::from_static(b"42"));
//!
//! assert!(envelope.is_heartbeat());
//! assert_eq!(envelope.payload(), b"42");
//! ```

use bytes::Bytes;

use super::wire_format::opcode;
use crate::codec::{Scanner, Value};
use crate::error::Result;

/// A decoded gateway envelope. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Opcode (`op`).
    pub op: u8,
    /// Raw JSON of the payload (`d`); `null` when absent.
    pub payload: Bytes,
    /// Sequence number (`s`), dispatch envelopes only.
    pub sequence: Option<u64>,
    /// Event name (`t`), dispatch envelopes only.
    pub event: Option<String>,
}

impl Envelope {
    /// Create an envelope without sequence or event name.
    pub fn new(op: u8, payload: Bytes) -> Self {
        Self {
            op,
            payload,
            sequence: None,
            event: None,
        }
    }

    /// Create a dispatch envelope.
    pub fn dispatch(event: &str, sequence: u64, payload: Bytes) -> Self {
        Self {
            op: opcode::DISPATCH,
            payload,
            sequence: Some(sequence),
            event: Some(event.to_string()),
        }
    }

    /// Get a reference to the raw payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Parse the top level of the payload.
    ///
    /// Objects and arrays are returned as raw spans; look into them with
    /// [`Value::get`] or another [`Scanner`].
    pub fn payload_value(&self) -> Result<Value<'_>> {
        Scanner::new(&self.payload).parse_document()
    }

    /// Event name, if any.
    #[inline]
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Check if this is a dispatch.
    #[inline]
    pub fn is_dispatch(&self) -> bool {
        self.op == opcode::DISPATCH
    }

    /// Check if this is a dispatch with the given event name.
    #[inline]
    pub fn is_event(&self, name: &str) -> bool {
        self.is_dispatch() && self.event_name() == Some(name)
    }

    /// Check if this is a heartbeat (request or outbound ping).
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.op == opcode::HEARTBEAT
    }

    /// Check if this is a hello.
    #[inline]
    pub fn is_hello(&self) -> bool {
        self.op == opcode::HELLO
    }

    /// Check if this acknowledges a heartbeat.
    #[inline]
    pub fn is_heartbeat_ack(&self) -> bool {
        self.op == opcode::HEARTBEAT_ACK
    }

    /// Opcode name for logs.
    #[inline]
    pub fn op_name(&self) -> &'static str {
        opcode::name(self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new(opcode::HEARTBEAT_ACK, Bytes::from_static(b"null"));

        assert!(envelope.is_heartbeat_ack());
        assert!(!envelope.is_dispatch());
        assert_eq!(envelope.sequence, None);
        assert_eq!(envelope.event_name(), None);
        assert_eq!(envelope.op_name(), "HEARTBEAT_ACK");
    }

    #[test]
    fn test_dispatch_accessors() {
        let envelope = Envelope::dispatch("MESSAGE_CREATE", 7, Bytes::from_static(b"{}"));

        assert!(envelope.is_dispatch());
        assert!(envelope.is_event("MESSAGE_CREATE"));
        assert!(!envelope.is_event("READY"));
        assert_eq!(envelope.sequence, Some(7));
    }

    #[test]
    fn test_payload_value() {
        let envelope = Envelope::new(
            opcode::HELLO,
            Bytes::from_static(b"{\"heartbeat_interval\":41250}"),
        );

        let value = envelope.payload_value().unwrap();
        let interval = value.get("heartbeat_interval").unwrap().unwrap();
        assert_eq!(interval.as_u64(), Some(41250));
    }

    #[test]
    fn test_payload_clone_is_zero_copy() {
        let payload = Bytes::from_static(b"{\"a\":1}");
        let envelope = Envelope::new(opcode::DISPATCH, payload.clone());

        let cloned = envelope.clone();
        assert_eq!(cloned.payload.as_ptr(), payload.as_ptr());
    }
}
