//! Dispatch queue between the connection and the application.
//!
//! Decoded dispatch envelopes are handed to a bounded mpsc channel instead of
//! invoking callbacks, so a slow or panicking consumer cannot stall the
//! protocol loop.
//!
//! ```text
//! Connection::poll ─► DispatchSender ─► mpsc (bounded) ─► DispatchReceiver ─► app task
//! ```
//!
//! Delivery never waits: when the queue is full, or the receiver is gone,
//! the envelope is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::Envelope;

/// Create a dispatch queue with the given capacity (must be non-zero).
pub fn dispatch_channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        DispatchSender {
            tx,
            dropped: dropped.clone(),
        },
        DispatchReceiver { rx, dropped },
    )
}

/// Producer half, owned by the connection.
#[derive(Debug)]
pub struct DispatchSender {
    tx: mpsc::Sender<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl DispatchSender {
    /// Queue an envelope without waiting. Returns `false` if it was dropped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    event = envelope.event_name().unwrap_or(""),
                    sequence = envelope.sequence,
                    dropped,
                    "Dispatch queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    event = envelope.event_name().unwrap_or(""),
                    dropped,
                    "Dispatch receiver gone, dropping event"
                );
                false
            }
        }
    }

    /// Number of envelopes dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Check if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, handed to the application.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::Receiver<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl DispatchReceiver {
    /// Wait for the next envelope. `None` once the connection is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take the next envelope if one is queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Number of envelopes the connection dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn event(seq: u64) -> Envelope {
        Envelope::dispatch("MESSAGE_CREATE", seq, Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn test_deliver_in_order() {
        let (sender, mut receiver) = dispatch_channel(4);

        assert!(sender.deliver(event(1)));
        assert!(sender.deliver(event(2)));

        assert_eq!(receiver.recv().await.unwrap().sequence, Some(1));
        assert_eq!(receiver.recv().await.unwrap().sequence, Some(2));
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (sender, mut receiver) = dispatch_channel(1);

        assert!(sender.deliver(event(1)));
        assert!(!sender.deliver(event(2)));
        assert!(!sender.deliver(event(3)));

        assert_eq!(sender.dropped(), 2);
        assert_eq!(receiver.dropped(), 2);
        assert_eq!(receiver.try_recv().unwrap().sequence, Some(1));
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_closed_receiver_drops() {
        let (sender, receiver) = dispatch_channel(4);
        drop(receiver);

        assert!(sender.is_closed());
        assert!(!sender.deliver(event(1)));
        assert_eq!(sender.dropped(), 1);
    }

    #[tokio::test]
    async fn test_recv_ends_when_sender_dropped() {
        let (sender, mut receiver) = dispatch_channel(4);
        sender.deliver(event(1));
        drop(sender);

        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }
}
