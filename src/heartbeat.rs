//! Heartbeat scheduling.
//!
//! [`HeartbeatScheduler`] is pure bookkeeping over millisecond timestamps
//! supplied by the caller; it never performs I/O or reads a clock itself.
//!
//! # Example
//!
//! ```
//! use gatewire::HeartbeatScheduler;
//!
//! let mut heartbeat = HeartbeatScheduler::new(0.0);
//! heartbeat.on_hello(41250, 0);
//! assert!(heartbeat.is_due(0));
//!
//! heartbeat.on_sent(0);
//! assert!(!heartbeat.is_due(50));
//! assert!(heartbeat.is_due(41250));
//! ```

use std::time::Duration;

use rand::Rng;

/// Tracks heartbeat timing for one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    /// Interval from hello, 0 until armed.
    interval_ms: u64,
    last_sent: Option<u64>,
    last_ack: Option<u64>,
    next_due: Option<u64>,
    /// Last sequence to echo in heartbeats.
    sequence: Option<u64>,
    /// First-ping jitter window as a fraction of the interval.
    jitter: f64,
}

impl HeartbeatScheduler {
    /// Create an unarmed scheduler. `jitter` is clamped to `[0.0, 1.0]`.
    pub fn new(jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            interval_ms: 0,
            last_sent: None,
            last_ack: None,
            next_due: None,
            sequence: None,
            jitter,
        }
    }

    /// Arm the scheduler with the server-provided interval.
    ///
    /// The first heartbeat is due after a random offset in
    /// `[0, interval * jitter)`.
    pub fn on_hello(&mut self, interval_ms: u64, now: u64) {
        let window = (interval_ms as f64 * self.jitter) as u64;
        let offset = if window == 0 {
            0
        } else {
            rand::rng().random_range(0..window)
        };

        self.interval_ms = interval_ms;
        self.last_sent = None;
        self.last_ack = None;
        self.next_due = Some(now.saturating_add(offset));
    }

    /// Check if a heartbeat should be sent.
    pub fn is_due(&self, now: u64) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    /// Record a sent heartbeat and schedule the next one.
    pub fn on_sent(&mut self, now: u64) {
        self.last_sent = Some(now);
        self.next_due = Some(now.saturating_add(self.interval_ms));
    }

    /// Record an acknowledgement.
    pub fn on_ack(&mut self, now: u64) {
        self.last_ack = Some(now);
    }

    /// Check if the last heartbeat is still unacknowledged.
    pub fn awaiting_ack(&self) -> bool {
        match (self.last_sent, self.last_ack) {
            (Some(sent), Some(ack)) => ack < sent,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Check if the acknowledgement is overdue: nothing acknowledged within
    /// the interval plus `grace` since the last heartbeat was sent.
    pub fn ack_overdue(&self, now: u64, grace: Duration) -> bool {
        self.ack_deadline(grace).is_some_and(|deadline| now >= deadline)
    }

    fn ack_deadline(&self, grace: Duration) -> Option<u64> {
        if !self.awaiting_ack() {
            return None;
        }
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self.last_sent
            .map(|sent| sent.saturating_add(self.interval_ms).saturating_add(grace_ms))
    }

    /// Next time the caller must wake up: the ack deadline while one is
    /// outstanding, the next heartbeat otherwise. `None` until armed.
    pub fn next_deadline(&self, grace: Duration) -> Option<u64> {
        self.ack_deadline(grace).or(self.next_due)
    }

    /// Record the last seen sequence.
    pub fn set_sequence(&mut self, sequence: Option<u64>) {
        self.sequence = sequence;
    }

    /// Sequence to echo in the next heartbeat.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    pub fn last_ack(&self) -> Option<u64> {
        self.last_ack
    }

    /// Round trip of the last acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        match (self.last_sent, self.last_ack) {
            (Some(sent), Some(ack)) if ack >= sent => Some(Duration::from_millis(ack - sent)),
            _ => None,
        }
    }

    /// Check if hello has armed the scheduler.
    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Disarm and forget all timestamps. The jitter setting is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.jitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(5);

    #[test]
    fn test_unarmed_is_never_due() {
        let heartbeat = HeartbeatScheduler::new(1.0);

        assert!(!heartbeat.is_armed());
        assert!(!heartbeat.is_due(u64::MAX));
        assert_eq!(heartbeat.next_deadline(GRACE), None);
    }

    #[test]
    fn test_due_after_interval() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(41250, 1_000);
        heartbeat.on_sent(1_000);

        assert!(!heartbeat.is_due(1_050));
        assert!(!heartbeat.is_due(1_000 + 41_249));
        assert!(heartbeat.is_due(1_000 + 41_250));
    }

    #[test]
    fn test_zero_jitter_is_immediate() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(41250, 500);

        assert!(heartbeat.is_due(500));
    }

    #[test]
    fn test_jitter_within_window() {
        for _ in 0..200 {
            let mut heartbeat = HeartbeatScheduler::new(1.0);
            heartbeat.on_hello(1000, 10_000);

            let due = heartbeat.next_deadline(GRACE).unwrap();
            assert!((10_000..11_000).contains(&due));
        }
    }

    #[test]
    fn test_partial_jitter_window() {
        for _ in 0..200 {
            let mut heartbeat = HeartbeatScheduler::new(0.25);
            heartbeat.on_hello(1000, 0);

            assert!(heartbeat.next_deadline(GRACE).unwrap() < 250);
        }
    }

    #[test]
    fn test_ack_tracking() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(1000, 0);
        assert!(!heartbeat.awaiting_ack());

        heartbeat.on_sent(0);
        assert!(heartbeat.awaiting_ack());

        heartbeat.on_ack(40);
        assert!(!heartbeat.awaiting_ack());
        assert_eq!(heartbeat.latency(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_ack_overdue() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(1000, 0);
        heartbeat.on_sent(0);

        assert!(!heartbeat.ack_overdue(5_999, GRACE));
        assert!(heartbeat.ack_overdue(6_000, GRACE));
        assert_eq!(heartbeat.next_deadline(GRACE), Some(6_000));

        heartbeat.on_ack(100);
        assert!(!heartbeat.ack_overdue(10_000, GRACE));
        assert_eq!(heartbeat.next_deadline(GRACE), Some(1_000));
    }

    #[test]
    fn test_hello_rearms() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(1000, 0);
        heartbeat.on_sent(0);

        heartbeat.on_hello(2000, 50);

        assert!(!heartbeat.awaiting_ack());
        assert_eq!(heartbeat.interval_ms(), 2000);
        assert!(heartbeat.is_due(50));
    }

    #[test]
    fn test_reset_keeps_jitter() {
        let mut heartbeat = HeartbeatScheduler::new(0.0);
        heartbeat.on_hello(1000, 0);
        heartbeat.set_sequence(Some(9));

        heartbeat.reset();

        assert!(!heartbeat.is_armed());
        assert_eq!(heartbeat.sequence(), None);
        heartbeat.on_hello(1000, 7);
        assert!(heartbeat.is_due(7));
    }

    #[test]
    fn test_jitter_is_clamped() {
        let mut heartbeat = HeartbeatScheduler::new(f64::NAN);
        heartbeat.on_hello(1000, 0);
        assert!(heartbeat.is_due(0));

        let mut heartbeat = HeartbeatScheduler::new(-3.0);
        heartbeat.on_hello(1000, 0);
        assert!(heartbeat.is_due(0));
    }
}
