use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainEvent;

/// Envelope for a published event, containing ordering metadata.
///
/// This is the unit handed to a transport.
///
/// Notes:
/// - `sequence_number` is monotonically increasing **per product**, so a
///   consumer can detect gaps, duplicates and reordering.
/// - `timestamp` serializes as an ISO-8601 string.
/// - The payload is flattened, so the JSON carries `event_type` and the
///   payload fields at the top level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E = DomainEvent> {
    event_id: Uuid,

    /// Monotonically increasing position in the product's event stream.
    sequence_number: u64,

    timestamp: DateTime<Utc>,

    #[serde(flatten)]
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(event_id: Uuid, sequence_number: u64, timestamp: DateTime<Utc>, payload: E) -> Self {
        Self {
            event_id,
            sequence_number,
            timestamp,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Serialize> EventEnvelope<E> {
    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Severity, LowStockAlert};
    use censudx_core::{InventoryRecordId, Location, ProductId};

    #[test]
    fn envelope_serializes_flat_with_iso_timestamp() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            7,
            Utc::now(),
            DomainEvent::LowStockAlert(LowStockAlert {
                inventory_record_id: InventoryRecordId::new(),
                product_id: ProductId::parse("product_123").unwrap(),
                location: Location::parse("warehouse_a").unwrap(),
                current_quantity: 5,
                threshold: 10,
                severity: Severity::Warning,
            }),
        );

        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["sequence_number"], 7);
        assert_eq!(json["event_type"], "low_stock_alert");
        assert_eq!(json["current_quantity"], 5);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
