//! Outbound transport abstraction (mechanics only).
//!
//! A [`Transport`] hands an enveloped event to a message channel. It is the
//! last hop of the publishing path and knows nothing about buffering or
//! retries; those live in the outbox that wraps it.
//!
//! ## Delivery
//!
//! The contract is **at-least-once**: once the ledger mutation behind an event
//! is durable, the event may be sent more than once (retries after a timeout,
//! replays from the local buffer) but is never silently dropped. Consumers
//! deduplicate on `(product_id, sequence_number)`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Queues the inventory core publishes to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    LowStockAlerts,
    StockValidation,
    InventoryUpdates,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::LowStockAlerts => "low_stock_alerts",
            Queue::StockValidation => "stock_validation",
            Queue::InventoryUpdates => "inventory_updates",
        }
    }
}

impl core::fmt::Display for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached. The message may be retried.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The envelope could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The broker refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Serialization failures will fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Serialization(_))
    }
}

/// Message channel the publisher writes to (RabbitMQ, Redis Streams, ...).
///
/// `send` returns once the transport has accepted the message. Failures are
/// surfaced to the caller (the outbox), which buffers and retries.
///
/// Implementations must be `Send + Sync`; the outbox dispatcher and the
/// sweeper may both drive sends.
pub trait Transport: Send + Sync {
    fn send(&self, queue: Queue, envelope: &EventEnvelope) -> Result<(), TransportError>;

    /// Cheap reachability probe. Used for diagnostics only; health of the
    /// inventory core never depends on it.
    fn is_connected(&self) -> bool {
        true
    }
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn send(&self, queue: Queue, envelope: &EventEnvelope) -> Result<(), TransportError> {
        (**self).send(queue, envelope)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
