//! Codec module - envelope decoding and encoding.
//!
//! - [`Scanner`] - byte-cursor JSON scanner producing a tagged [`Value`]
//! - [`EnvelopeCodec`] - gateway envelopes on top of the scanner (decode)
//!   and `serde_json` (encode)
//!
//! # Design
//!
//! Inbound messages are never parsed into a document tree. The scanner
//! reads one nesting level and returns nested objects and arrays as raw
//! spans, so the payload of an envelope stays a slice of the received
//! message until someone asks for a field inside it.
//!
//! # Example
//!
//! ```
//! use gatewire::codec::EnvelopeCodec;
//! use bytes::Bytes;
//!
//! let message = Bytes::from_static(b"{\"op\":10,\"d\":{\"heartbeat_interval\":41250}}");
//! let envelope = EnvelopeCodec::decode(message).unwrap();
//!
//! assert!(envelope.is_hello());
//! assert_eq!(EnvelopeCodec::hello_interval(&envelope).unwrap(), 41250);
//! ```

mod envelope;
mod scanner;

pub use envelope::EnvelopeCodec;
pub use scanner::{Member, Members, Scanner, Value, MAX_DEPTH};
