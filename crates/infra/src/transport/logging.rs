//! Broker-less transport: events are written to the log and dropped.

use tracing::debug;

use censudx_events::{Event, EventEnvelope, Queue, Transport, TransportError};

/// Fallback when no message broker is configured. Retains nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

impl Transport for LoggingTransport {
    fn send(&self, queue: Queue, envelope: &EventEnvelope) -> Result<(), TransportError> {
        debug!(
            queue = %queue,
            event_type = envelope.payload().event_type(),
            product_id = %envelope.payload().product_id(),
            sequence_number = envelope.sequence_number(),
            "event emitted without a broker"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{EventOutbox, OutboxConfig};
    use censudx_core::{Location, ProductId};
    use censudx_events::StockValidation;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn accepts_everything_and_keeps_nothing() {
        let outbox = EventOutbox::new(Arc::new(LoggingTransport), OutboxConfig::default());
        for requested_quantity in 1..=100 {
            outbox.publish(
                StockValidation {
                    product_id: ProductId::parse("product_123").unwrap(),
                    location: Location::parse("warehouse_a").unwrap(),
                    requested_quantity,
                    available_quantity: 50,
                    order_id: None,
                    validation_result: requested_quantity <= 50,
                },
                Utc::now(),
            );
        }

        let report = outbox.flush();
        assert_eq!(report.delivered, 100);
        assert_eq!(outbox.stats().buffered, 0);
        assert!(outbox.is_transport_connected());
    }
}
