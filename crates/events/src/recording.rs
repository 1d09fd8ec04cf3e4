//! Recording transport for tests.
//!
//! Keeps every accepted message in memory; never wire it into a long-running
//! process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::bus::{Queue, Transport, TransportError};
use crate::envelope::EventEnvelope;

/// A message accepted by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub queue: Queue,
    pub envelope: EventEnvelope,
    pub sent_at: DateTime<Utc>,
}

/// Transport that records what it is given.
///
/// Records every accepted message for inspection and can be switched
/// offline to simulate a broker outage.
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    available: AtomicBool,
    refusing: AtomicBool,
    rejected: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate a reachable broker that refuses every message.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Every message accepted so far, in send order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Messages accepted on one queue, in send order.
    pub fn sent_to(&self, queue: Queue) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.queue == queue)
            .collect()
    }

    /// Number of sends refused, offline or not.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            refusing: AtomicBool::new(false),
            rejected: AtomicU64::new(0),
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, queue: Queue, envelope: &EventEnvelope) -> Result<(), TransportError> {
        if !self.available.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Unavailable("recording transport offline".to_string()));
        }
        if self.refusing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Rejected("recording transport refusing".to_string()));
        }

        let message = SentMessage {
            queue,
            envelope: envelope.clone(),
            sent_at: Utc::now(),
        };

        self.sent
            .lock()
            .map_err(|_| TransportError::Unavailable("lock poisoned".to_string()))?
            .push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
