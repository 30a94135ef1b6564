//! Protocol module - wire constants, envelopes and fragment reassembly.
//!
//! - Opcode, close code and intent constants
//! - Reassembler for accumulating fragmented transport reads
//! - Envelope struct with typed accessors

mod envelope;
mod reassembler;
mod wire_format;

pub use envelope::Envelope;
pub use reassembler::{Reassembler, DEFAULT_BUFFER_CAPACITY};
pub use wire_format::{
    close_code, gateway_endpoint, intents, is_valid_resume_url, opcode, DEFAULT_GATEWAY_URL,
    parse_websocket_url, GATEWAY_ENCODING, GATEWAY_VERSION,
};
