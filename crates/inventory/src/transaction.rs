//! Transaction log entries and the ledger facts they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use censudx_core::{CorrelationId, InventoryRecordId, Location, ProductId, ReferenceId, TransactionType};
use censudx_events::InventoryUpdate;

use crate::record::InventoryRecord;
use crate::reservation::Reservation;

/// A committed ledger mutation, as returned by the ledger.
///
/// The ledger only reports facts; deciding what to log, alert on and publish
/// is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub transaction_type: TransactionType,
    pub before: InventoryRecord,
    pub after: InventoryRecord,
    /// Reservation created or transitioned by this change, if any.
    pub reservation: Option<Reservation>,
    pub reason: Option<String>,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
}

impl StockChange {
    /// Signed change of the quantity the operation acts on: the total for
    /// IN/OUT/ADJUST, the reserved quantity for RESERVE/RELEASE.
    pub fn quantity_delta(&self) -> i64 {
        match self.transaction_type {
            TransactionType::Reserve | TransactionType::Release => {
                self.after.reserved_quantity() - self.before.reserved_quantity()
            }
            TransactionType::In | TransactionType::Out | TransactionType::Adjust => {
                self.after.total_quantity() - self.before.total_quantity()
            }
        }
    }

    pub fn available_changed(&self) -> bool {
        self.before.available_quantity() != self.after.available_quantity()
    }

    pub fn to_transaction(&self) -> NewTransaction {
        NewTransaction {
            inventory_record_id: self.after.id_typed(),
            product_id: self.after.product_id().clone(),
            location: self.after.location().clone(),
            transaction_type: self.transaction_type,
            quantity_delta: self.quantity_delta(),
            resulting_total: self.after.total_quantity(),
            resulting_reserved: self.after.reserved_quantity(),
            reason: self.reason.clone(),
            reference_id: self.reservation.as_ref().map(|r| r.reference_id().clone()),
            correlation_id: self.correlation_id,
            timestamp: self.occurred_at,
        }
    }

    /// Inventory update event describing the change in available quantity.
    pub fn to_update_event(&self) -> InventoryUpdate {
        InventoryUpdate::new(
            self.after.id_typed(),
            self.after.product_id().clone(),
            self.after.location().clone(),
            self.before.available_quantity(),
            self.after.available_quantity(),
            self.transaction_type,
        )
    }
}

/// A transaction ready to be appended (not yet assigned a sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub inventory_record_id: InventoryRecordId,
    pub product_id: ProductId,
    pub location: Location,
    pub transaction_type: TransactionType,
    pub quantity_delta: i64,
    pub resulting_total: i64,
    pub resulting_reserved: i64,
    pub reason: Option<String>,
    pub reference_id: Option<ReferenceId>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl NewTransaction {
    pub fn into_record(self, sequence_number: u64) -> TransactionRecord {
        TransactionRecord {
            sequence_number,
            inventory_record_id: self.inventory_record_id,
            product_id: self.product_id,
            location: self.location,
            transaction_type: self.transaction_type,
            quantity_delta: self.quantity_delta,
            resulting_total: self.resulting_total,
            resulting_reserved: self.resulting_reserved,
            reason: self.reason,
            reference_id: self.reference_id,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
        }
    }
}

/// An immutable, appended transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Position in the log; strictly increasing in append order.
    pub sequence_number: u64,
    pub inventory_record_id: InventoryRecordId,
    pub product_id: ProductId,
    pub location: Location,
    pub transaction_type: TransactionType,
    pub quantity_delta: i64,
    pub resulting_total: i64,
    pub resulting_reserved: i64,
    pub reason: Option<String>,
    pub reference_id: Option<ReferenceId>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use censudx_core::StockKey;

    #[test]
    fn reserve_change_reports_reserved_delta_and_available_drop() {
        let now = Utc::now();
        let before = InventoryRecord::open(StockKey::parse("product_123", "warehouse_a").unwrap(), now)
            .receive(100, now)
            .unwrap();
        let after = before.reserve(10, now).unwrap();

        let change = StockChange {
            transaction_type: TransactionType::Reserve,
            before,
            after,
            reservation: None,
            reason: None,
            correlation_id: CorrelationId::new(),
            occurred_at: now,
        };

        assert_eq!(change.quantity_delta(), 10);
        assert!(change.available_changed());

        let tx = change.to_transaction();
        assert_eq!(tx.resulting_total, 100);
        assert_eq!(tx.resulting_reserved, 10);

        let update = change.to_update_event();
        assert_eq!(update.old_quantity, 100);
        assert_eq!(update.new_quantity, 90);
        assert_eq!(update.quantity_change, -10);
    }
}
