//! Domain events emitted by stock operations.
//!
//! Field names match the JSON payloads consumed downstream; the `event_type`
//! tag is added by the serde representation of [`DomainEvent`].

use serde::{Deserialize, Serialize};

use censudx_core::{InventoryRecordId, Location, ProductId, TransactionType};

use crate::bus::Queue;
use crate::event::Event;

/// Severity of a low-stock condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Available quantity is at or below the threshold but not exhausted.
    Warning,
    /// Nothing left to reserve.
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub inventory_record_id: InventoryRecordId,
    pub product_id: ProductId,
    pub location: Location,
    /// Available quantity at the time of evaluation.
    pub current_quantity: i64,
    pub threshold: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValidation {
    pub product_id: ProductId,
    pub location: Location,
    pub requested_quantity: i64,
    pub available_quantity: i64,
    pub order_id: Option<String>,
    pub validation_result: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub inventory_record_id: InventoryRecordId,
    pub product_id: ProductId,
    pub location: Location,
    /// Available quantity before the mutation.
    pub old_quantity: i64,
    /// Available quantity after the mutation.
    pub new_quantity: i64,
    pub quantity_change: i64,
    pub transaction_type: TransactionType,
}

impl InventoryUpdate {
    pub fn new(
        inventory_record_id: InventoryRecordId,
        product_id: ProductId,
        location: Location,
        old_quantity: i64,
        new_quantity: i64,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            inventory_record_id,
            product_id,
            location,
            old_quantity,
            new_quantity,
            quantity_change: new_quantity - old_quantity,
            transaction_type,
        }
    }
}

/// Every event the inventory core publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    LowStockAlert(LowStockAlert),
    StockValidation(StockValidation),
    InventoryUpdate(InventoryUpdate),
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LowStockAlert(_) => "low_stock_alert",
            DomainEvent::StockValidation(_) => "stock_validation",
            DomainEvent::InventoryUpdate(_) => "inventory_update",
        }
    }

    fn queue(&self) -> Queue {
        match self {
            DomainEvent::LowStockAlert(_) => Queue::LowStockAlerts,
            DomainEvent::StockValidation(_) => Queue::StockValidation,
            DomainEvent::InventoryUpdate(_) => Queue::InventoryUpdates,
        }
    }

    fn product_id(&self) -> &ProductId {
        match self {
            DomainEvent::LowStockAlert(e) => &e.product_id,
            DomainEvent::StockValidation(e) => &e.product_id,
            DomainEvent::InventoryUpdate(e) => &e.product_id,
        }
    }
}

impl From<LowStockAlert> for DomainEvent {
    fn from(value: LowStockAlert) -> Self {
        DomainEvent::LowStockAlert(value)
    }
}

impl From<StockValidation> for DomainEvent {
    fn from(value: StockValidation) -> Self {
        DomainEvent::StockValidation(value)
    }
}

impl From<InventoryUpdate> for DomainEvent {
    fn from(value: InventoryUpdate) -> Self {
        DomainEvent::InventoryUpdate(value)
    }
}
