//! Event outbox: the publishing side of the inventory core.
//!
//! Durable ledger state and event delivery are decoupled. Once a mutation is
//! committed, its events are handed to the outbox, which:
//!
//! - assigns a per-product `sequence_number` (monotonically increasing)
//! - appends the event to a bounded local FIFO and wakes the dispatcher
//! - sends due events in order on [`EventOutbox::flush`], outside the state
//!   lock, backing off per [`RetryPolicy`] when a send fails
//! - dead-letters events the broker refuses too often, that cannot be
//!   encoded, or that are evicted from a full buffer (counted and logged,
//!   never silently dropped)
//!
//! An unreachable broker never exhausts an event; it stays buffered until
//! delivered or evicted. Only one flush sends at a time, so per-product
//! sequence order is also delivery order.
//!
//! `publish` never fails to its caller and never touches the transport.

pub mod dispatcher;
pub mod retry;

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use censudx_core::ProductId;
use censudx_events::{DomainEvent, Event, EventEnvelope, Queue, Transport, TransportError};

pub use dispatcher::{DispatcherConfig, DispatcherHandle, OutboxDispatcher};
pub use retry::{Backoff, RetryPolicy};

/// Default bound on locally buffered events.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxConfig {
    pub capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_OUTBOX_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outbox counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    /// Events accepted by the transport.
    pub published: u64,
    /// Events waiting to be sent.
    pub buffered: usize,
    /// Re-send attempts made from the buffer.
    pub retried: u64,
    pub dead_lettered: u64,
}

/// An event that will not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: Queue,
    pub envelope: EventEnvelope,
    pub attempts: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dead_lettered: usize,
    pub remaining: usize,
}

#[derive(Debug)]
struct Pending {
    queue: Queue,
    envelope: EventEnvelope,
    attempts: u32,
    next_attempt_at: Instant,
}

#[derive(Debug, Default)]
struct OutboxState {
    sequences: HashMap<ProductId, u64>,
    buffer: VecDeque<Pending>,
    dead_letters: VecDeque<DeadLetter>,
    published: u64,
    retried: u64,
    dead_lettered: u64,
}

enum Disposition {
    Requeued,
    DeadLettered,
}

pub struct EventOutbox {
    transport: Arc<dyn Transport>,
    config: OutboxConfig,
    state: Mutex<OutboxState>,
    /// Held for a whole flush so two flushes never interleave sends.
    sending: Mutex<()>,
    wake: SyncSender<()>,
    wake_rx: Mutex<Option<Receiver<()>>>,
}

impl std::fmt::Debug for EventOutbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventOutbox")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventOutbox {
    pub fn new(transport: Arc<dyn Transport>, config: OutboxConfig) -> Self {
        let (wake, wake_rx) = mpsc::sync_channel(1);
        Self {
            transport,
            config,
            state: Mutex::new(OutboxState::default()),
            sending: Mutex::new(()),
            wake,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    // A panic mid-publish leaves counters at worst slightly stale; keep going.
    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sequence and buffer one event. Returns the envelope as assigned.
    pub fn publish(&self, event: impl Into<DomainEvent>, occurred_at: DateTime<Utc>) -> EventEnvelope {
        let event = event.into();
        let queue = event.queue();

        let envelope = {
            let mut state = self.lock();
            let sequence = state.sequences.entry(event.product_id().clone()).or_insert(0);
            *sequence += 1;
            let envelope = EventEnvelope::new(Uuid::now_v7(), *sequence, occurred_at, event);
            self.enqueue(&mut state, queue, envelope.clone());
            envelope
        };

        // Full means a wake-up is already pending.
        let _ = self.wake.try_send(());
        envelope
    }

    /// Send every due buffered event in order.
    pub fn flush(&self) -> FlushReport {
        self.flush_at(Instant::now())
    }

    /// Send buffered events due at `now`. Stops at the first event that is
    /// not yet due or goes back to the buffer, so order is never broken.
    pub fn flush_at(&self, now: Instant) -> FlushReport {
        let _sending = self.sending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = FlushReport::default();

        loop {
            let pending = {
                let mut state = self.lock();
                if !state.buffer.front().is_some_and(|p| p.next_attempt_at <= now) {
                    break;
                }
                let Some(pending) = state.buffer.pop_front() else {
                    break;
                };
                if pending.attempts > 0 {
                    state.retried += 1;
                }
                pending
            };

            let sent = self.transport.send(pending.queue, &pending.envelope);

            let mut state = self.lock();
            match sent {
                Ok(()) => {
                    state.published += 1;
                    report.delivered += 1;
                }
                Err(err) => match self.after_failure(&mut state, pending, err, now) {
                    Disposition::DeadLettered => report.dead_lettered += 1,
                    Disposition::Requeued => break,
                },
            }
        }

        report.remaining = self.lock().buffer.len();
        if report.delivered > 0 || report.dead_lettered > 0 {
            debug!(
                delivered = report.delivered,
                dead_lettered = report.dead_lettered,
                remaining = report.remaining,
                "outbox flushed"
            );
        }
        report
    }

    pub fn stats(&self) -> OutboxStats {
        let state = self.lock();
        OutboxStats {
            published: state.published,
            buffered: state.buffer.len(),
            retried: state.retried,
            dead_lettered: state.dead_lettered,
        }
    }

    /// Most recent dead letters (bounded by the outbox capacity), oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.iter().cloned().collect()
    }

    pub fn is_transport_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// The wake-up channel; only the first caller gets it.
    pub(crate) fn take_wake_receiver(&self) -> Option<Receiver<()>> {
        self.wake_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub(crate) fn wake_sender(&self) -> SyncSender<()> {
        self.wake.clone()
    }

    /// A send failed; put the event back at the head or dead-letter it.
    fn after_failure(
        &self,
        state: &mut OutboxState,
        pending: Pending,
        err: TransportError,
        now: Instant,
    ) -> Disposition {
        let attempts = pending.attempts.saturating_add(1);
        let retry = match &err {
            TransportError::Unavailable(_) => true,
            TransportError::Rejected(_) => self.config.retry.allows_attempt_after(attempts),
            TransportError::Serialization(_) => false,
        };

        if !retry {
            let reason = match &err {
                TransportError::Rejected(_) => format!("gave up after {attempts} attempts: {err}"),
                _ => err.to_string(),
            };
            self.dead_letter(state, pending.queue, pending.envelope, attempts, reason);
            return Disposition::DeadLettered;
        }

        let delay = self.config.retry.delay_after(attempts);
        warn!(
            queue = %pending.queue,
            product_id = %pending.envelope.payload().product_id(),
            sequence_number = pending.envelope.sequence_number(),
            attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "event send failed; keeping it buffered"
        );
        state.buffer.push_front(Pending {
            attempts,
            next_attempt_at: now + delay,
            ..pending
        });
        self.evict_overflow(state);
        Disposition::Requeued
    }

    fn enqueue(&self, state: &mut OutboxState, queue: Queue, envelope: EventEnvelope) {
        state.buffer.push_back(Pending {
            queue,
            envelope,
            attempts: 0,
            next_attempt_at: Instant::now(),
        });
        self.evict_overflow(state);
    }

    /// Dead-letter the oldest events until the buffer fits its capacity.
    fn evict_overflow(&self, state: &mut OutboxState) {
        while state.buffer.len() > self.config.capacity.max(1) {
            let Some(evicted) = state.buffer.pop_front() else {
                break;
            };
            self.dead_letter(
                state,
                evicted.queue,
                evicted.envelope,
                evicted.attempts,
                "outbox buffer full".to_string(),
            );
        }
    }

    fn dead_letter(
        &self,
        state: &mut OutboxState,
        queue: Queue,
        envelope: EventEnvelope,
        attempts: u32,
        reason: String,
    ) {
        error!(
            queue = %queue,
            event_id = %envelope.event_id(),
            event_type = envelope.payload().event_type(),
            product_id = %envelope.payload().product_id(),
            sequence_number = envelope.sequence_number(),
            attempts,
            reason = %reason,
            "event dead-lettered"
        );

        state.dead_lettered += 1;
        if state.dead_letters.len() >= self.config.capacity.max(1) {
            state.dead_letters.pop_front();
        }
        state.dead_letters.push_back(DeadLetter {
            queue,
            envelope,
            attempts,
            reason,
            dead_lettered_at: Utc::now(),
        });
    }
}

/// An instant past every scheduled retry.
#[cfg(test)]
pub(crate) fn far_future() -> Instant {
    Instant::now() + std::time::Duration::from_secs(24 * 60 * 60)
}
