//! Reassembly of transport fragments into complete messages.
//!
//! The transport may deliver one logical message in several fragments.
//! [`Reassembler`] copies each fragment at its write cursor and hands the
//! whole message back when the final fragment arrives:
//!
//! ```
//! use gatewire::protocol::Reassembler;
//!
//! let mut buffer = Reassembler::new();
//!
//! assert!(buffer.append(b"{\"op\":1", false).unwrap().is_none());
//! let message = buffer.append(b",\"d\":null}", true).unwrap().unwrap();
//!
//! assert_eq!(&message[..], b"{\"op\":1,\"d\":null}");
//! assert!(buffer.is_empty());
//! ```
//!
//! Growth is fallible and transactional: when the buffer cannot grow, the
//! bytes already held stay untouched and `OutOfMemory` is returned. After a
//! hand-off the cursor returns to zero but the capacity is kept, so the next
//! message reuses the allocation. Only one message is in flight at a time.

use bytes::Bytes;

use crate::error::{GatewayError, Result};

/// Default initial capacity (64KB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Accumulates fragments of the current inbound message.
#[derive(Debug)]
pub struct Reassembler {
    /// Bytes of the message in flight. `len()` is the write cursor.
    buffer: Vec<u8>,
    /// Optional upper bound on a reassembled message.
    max_message_size: Option<usize>,
    /// Set while skipping the remaining fragments of an oversized message.
    overflowed: bool,
}

impl Reassembler {
    /// Create a reassembler with the default capacity and no size bound.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a reassembler with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            max_message_size: None,
            overflowed: false,
        }
    }

    /// Bound the size of a single reassembled message.
    ///
    /// A message that grows past the bound is discarded whole; the final
    /// fragment then reports `Malformed`.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = Some(max);
        self
    }

    /// Append a fragment, returning the complete message when `is_final`.
    ///
    /// # Errors
    ///
    /// - `OutOfMemory` if the buffer cannot grow or the completed message
    ///   cannot be copied out. Previously held bytes are left intact.
    /// - `Malformed` on the final fragment of a message that exceeded
    ///   `max_message_size`.
    pub fn append(&mut self, fragment: &[u8], is_final: bool) -> Result<Option<Bytes>> {
        if self.overflowed {
            if is_final {
                self.overflowed = false;
                return Err(self.oversized());
            }
            return Ok(None);
        }

        if let Some(max) = self.max_message_size {
            if self.buffer.len().saturating_add(fragment.len()) > max {
                tracing::warn!(
                    max,
                    buffered = self.buffer.len(),
                    fragment = fragment.len(),
                    "Discarding oversized message"
                );
                self.buffer.clear();
                if is_final {
                    return Err(self.oversized());
                }
                self.overflowed = true;
                return Ok(None);
            }
        }

        self.reserve_for(fragment.len())?;
        self.buffer.extend_from_slice(fragment);

        if !is_final {
            return Ok(None);
        }

        let message = self.take_message()?;
        Ok(Some(message))
    }

    /// Make room for `additional` bytes past the cursor.
    ///
    /// Grows to twice the required size. `try_reserve_exact` leaves the
    /// vector unchanged on failure.
    fn reserve_for(&mut self, additional: usize) -> Result<()> {
        let len = self.buffer.len();
        let required = len
            .checked_add(additional)
            .ok_or(GatewayError::OutOfMemory { requested: usize::MAX })?;

        if required <= self.buffer.capacity() {
            return Ok(());
        }

        let target = required.saturating_mul(2);
        self.buffer
            .try_reserve_exact(target - len)
            .map_err(|_| GatewayError::OutOfMemory { requested: target })
    }

    /// Copy the buffered message out and reset the cursor.
    fn take_message(&mut self) -> Result<Bytes> {
        let len = self.buffer.len();
        let mut message = Vec::new();
        message
            .try_reserve_exact(len)
            .map_err(|_| GatewayError::OutOfMemory { requested: len })?;
        message.extend_from_slice(&self.buffer);

        self.buffer.clear();
        Ok(Bytes::from(message))
    }

    fn oversized(&self) -> GatewayError {
        GatewayError::Malformed(format!(
            "message exceeds maximum size of {} bytes",
            self.max_message_size.unwrap_or(0)
        ))
    }

    /// Number of bytes buffered for the message in flight.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no partial message is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current allocation size.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Drop any partial message, keeping the allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Drop any partial message and free the allocation.
    pub fn release(&mut self) {
        self.buffer = Vec::new();
        self.overflowed = false;
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_final_fragment() {
        let mut buffer = Reassembler::new();

        let message = buffer.append(b"{\"op\":11}", true).unwrap().unwrap();

        assert_eq!(&message[..], b"{\"op\":11}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragments_are_concatenated_in_order() {
        let mut buffer = Reassembler::new();

        assert!(buffer.append(b"{\"op\":0,", false).unwrap().is_none());
        assert!(buffer.append(b"\"d\":{},", false).unwrap().is_none());
        assert_eq!(buffer.len(), 15);

        let message = buffer.append(b"\"s\":1}", true).unwrap().unwrap();
        assert_eq!(&message[..], b"{\"op\":0,\"d\":{},\"s\":1}");
    }

    #[test]
    fn test_capacity_retained_after_handoff() {
        let mut buffer = Reassembler::with_capacity(4);
        let payload = vec![b'x'; 1000];

        buffer.append(&payload, true).unwrap();
        let grown = buffer.capacity();
        assert!(grown >= 2000, "growth should at least double the required size");

        buffer.append(b"small", true).unwrap();
        assert_eq!(buffer.capacity(), grown);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = Reassembler::with_capacity(1);
        let text = b"{\"op\":10,\"d\":{\"heartbeat_interval\":41250}}";

        for byte in &text[..text.len() - 1] {
            assert!(buffer.append(&[*byte], false).unwrap().is_none());
        }
        let message = buffer.append(&text[text.len() - 1..], true).unwrap().unwrap();

        assert_eq!(&message[..], &text[..]);
    }

    #[test]
    fn test_empty_final_fragment_completes_message() {
        let mut buffer = Reassembler::new();

        buffer.append(b"{\"op\":11}", false).unwrap();
        let message = buffer.append(b"", true).unwrap().unwrap();

        assert_eq!(&message[..], b"{\"op\":11}");
    }

    #[test]
    fn test_overflowing_length_keeps_contents() {
        let mut buffer = Reassembler::new();
        buffer.append(b"partial", false).unwrap();

        let result = buffer.reserve_for(usize::MAX);

        assert!(matches!(result, Err(GatewayError::OutOfMemory { .. })));
        assert_eq!(buffer.len(), 7);
        assert_eq!(buffer.buffer, b"partial");
    }

    #[test]
    fn test_failed_growth_keeps_contents() {
        let mut buffer = Reassembler::with_capacity(16);
        buffer.append(b"partial", false).unwrap();
        let capacity = buffer.capacity();

        // Larger than isize::MAX once doubled: the allocator is never asked.
        let result = buffer.reserve_for(isize::MAX as usize);

        assert!(matches!(result, Err(GatewayError::OutOfMemory { .. })));
        assert_eq!(buffer.buffer, b"partial");
        assert_eq!(buffer.capacity(), capacity);

        let message = buffer.append(b" message", true).unwrap().unwrap();
        assert_eq!(&message[..], b"partial message");
    }

    #[test]
    fn test_max_message_size_discards_whole_message() {
        let mut buffer = Reassembler::new().with_max_message_size(8);

        assert!(buffer.append(b"12345", false).unwrap().is_none());
        assert!(buffer.append(b"67890", false).unwrap().is_none());
        assert!(buffer.is_empty());
        assert!(buffer.append(b"tail", false).unwrap().is_none());

        let result = buffer.append(b"end", true);
        assert!(matches!(result, Err(GatewayError::Malformed(_))));

        // The next message is accepted normally.
        let message = buffer.append(b"ok", true).unwrap().unwrap();
        assert_eq!(&message[..], b"ok");
    }

    #[test]
    fn test_reset_and_release() {
        let mut buffer = Reassembler::new();
        buffer.append(b"partial", false).unwrap();

        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= DEFAULT_BUFFER_CAPACITY);

        buffer.release();
        assert_eq!(buffer.capacity(), 0);

        let message = buffer.append(b"again", true).unwrap().unwrap();
        assert_eq!(&message[..], b"again");
    }

    proptest! {
        #[test]
        fn prop_message_is_exact_concatenation(
            fragments in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..16),
            initial in 0usize..64,
        ) {
            let mut buffer = Reassembler::with_capacity(initial);
            let last = fragments.len() - 1;
            let mut result = None;

            for (i, fragment) in fragments.iter().enumerate() {
                let out = buffer.append(fragment, i == last).unwrap();
                if i < last {
                    prop_assert!(out.is_none());
                } else {
                    result = out;
                }
            }

            let expected: Vec<u8> = fragments.concat();
            let message = result.unwrap();
            prop_assert_eq!(message.len(), fragments.iter().map(Vec::len).sum::<usize>());
            prop_assert_eq!(&message[..], &expected[..]);
            prop_assert!(buffer.is_empty());
        }
    }
}
