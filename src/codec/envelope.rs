//! Envelope codec.
//!
//! Decoding runs the [`Scanner`] over the top level of a message only: `op`,
//! `s` and `t` are extracted and `d` is kept as a zero-copy slice of the
//! message. Encoding covers the outbound control envelopes (identify,
//! heartbeat, resume) and goes through `serde_json`.
//!
//! # Example
//!
//! ```
//! use gatewire::codec::EnvelopeCodec;
//! use gatewire::protocol::opcode;
//!
//! let bytes = EnvelopeCodec::encode_heartbeat(Some(42)).unwrap();
//! let envelope = EnvelopeCodec::decode(bytes).unwrap();
//!
//! assert_eq!(envelope.op, opcode::HEARTBEAT);
//! assert_eq!(envelope.payload(), b"42");
//! ```

use bytes::Bytes;
use serde::Serialize;

use super::scanner::{Scanner, Value};
use crate::config::ClientProperties;
use crate::error::{GatewayError, Result};
use crate::protocol::{opcode, Envelope};
use crate::session::SessionIdentity;

const NULL_PAYLOAD: &[u8] = b"null";

#[derive(Serialize)]
struct Outbound<D> {
    op: u8,
    d: D,
}

#[derive(Serialize)]
struct IdentifyPayload<'a> {
    token: &'a str,
    intents: u32,
    properties: &'a ClientProperties,
}

#[derive(Serialize)]
struct ResumePayload<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

/// Gateway envelope codec.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode one complete message.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the message is not a JSON object, `op` is
    /// missing or not an integer in `0..=255`, `s` is not an integer or null,
    /// or `t` is not a string or null.
    pub fn decode(message: Bytes) -> Result<Envelope> {
        let mut op = None;
        let mut payload = None;
        let mut sequence = None;
        let mut event = None;

        for member in Scanner::new(&message).members()? {
            let member = member?;
            match &*member.key {
                "op" => op = Some(Self::opcode(&member.value)?),
                "d" => payload = Some(member.span),
                "s" => sequence = Self::optional_u64(&member.value)?,
                "t" => event = Self::optional_string(member.value)?,
                _ => {}
            }
        }

        let op = op.ok_or_else(|| GatewayError::Malformed("missing required key \"op\"".into()))?;
        let payload = match payload {
            Some(span) => message.slice(span),
            None => Bytes::from_static(NULL_PAYLOAD),
        };

        Ok(Envelope {
            op,
            payload,
            sequence,
            event,
        })
    }

    fn opcode(value: &Value<'_>) -> Result<u8> {
        value
            .as_u64()
            .and_then(|op| u8::try_from(op).ok())
            .ok_or_else(|| {
                GatewayError::Malformed(format!(
                    "\"op\" must be an integer in 0..=255, got {}",
                    value.kind()
                ))
            })
    }

    fn optional_u64(value: &Value<'_>) -> Result<Option<u64>> {
        match value {
            Value::Null => Ok(None),
            other => other.as_u64().map(Some).ok_or_else(|| {
                GatewayError::Malformed("\"s\" must be a non-negative integer or null".into())
            }),
        }
    }

    fn optional_string(value: Value<'_>) -> Result<Option<String>> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.into_owned())),
            other => Err(GatewayError::Malformed(format!(
                "\"t\" must be a string or null, got {}",
                other.kind()
            ))),
        }
    }

    /// Encode an identify envelope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` if the token is empty or contains characters
    /// that would need escaping.
    pub fn encode_identify(
        token: &str,
        intents: u32,
        properties: &ClientProperties,
    ) -> Result<Bytes> {
        Self::validate_token(token)?;
        Self::encode(
            opcode::IDENTIFY,
            IdentifyPayload {
                token,
                intents,
                properties,
            },
        )
    }

    /// Encode a heartbeat carrying the last sequence, or `null` if none is known.
    pub fn encode_heartbeat(sequence: Option<u64>) -> Result<Bytes> {
        Self::encode(opcode::HEARTBEAT, sequence)
    }

    /// Encode a resume envelope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` for a bad token or an empty session id.
    pub fn encode_resume(token: &str, session_id: &str, sequence: u64) -> Result<Bytes> {
        Self::validate_token(token)?;
        if session_id.is_empty() {
            return Err(GatewayError::InvalidParam(
                "session id must not be empty".into(),
            ));
        }
        Self::encode(
            opcode::RESUME,
            ResumePayload {
                token,
                session_id,
                seq: sequence,
            },
        )
    }

    #[inline]
    fn encode<D: Serialize>(op: u8, d: D) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&Outbound { op, d })?))
    }

    /// Reject tokens that are empty or contain quotes, backslashes or
    /// control characters.
    pub fn validate_token(token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(GatewayError::InvalidParam("token must not be empty".into()));
        }
        if token
            .chars()
            .any(|c| c == '"' || c == '\\' || c.is_control())
        {
            return Err(GatewayError::InvalidParam(
                "token contains characters that require escaping".into(),
            ));
        }
        Ok(())
    }

    /// Heartbeat interval (ms) from a hello payload.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if `heartbeat_interval` is missing or not a
    /// positive integer.
    pub fn hello_interval(envelope: &Envelope) -> Result<u64> {
        let payload = envelope.payload_value()?;
        payload
            .get("heartbeat_interval")?
            .and_then(|v| v.as_u64())
            .filter(|&ms| ms > 0)
            .ok_or_else(|| {
                GatewayError::Malformed(
                    "hello without a positive integer heartbeat_interval".into(),
                )
            })
    }

    /// Resumable flag of an invalid-session payload. Anything but `true`
    /// counts as non-resumable.
    pub fn invalid_session_resumable(envelope: &Envelope) -> bool {
        matches!(envelope.payload_value(), Ok(Value::Bool(true)))
    }

    /// Session id and resume endpoint from a READY payload.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if either field is missing or not a string.
    pub fn ready_identity(envelope: &Envelope) -> Result<SessionIdentity> {
        let payload = envelope.payload_value()?;
        let field = |key: &str| -> Result<String> {
            match payload.get(key)? {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.into_owned()),
                _ => Err(GatewayError::Malformed(format!(
                    "READY without a string {:?}",
                    key
                ))),
            }
        };

        Ok(SessionIdentity {
            session_id: field("session_id")?,
            resume_url: field("resume_gateway_url")?,
        })
    }
}
