//! Inventory record: total vs reserved quantity for one (product, location).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use censudx_core::{InventoryError, InventoryRecordId, InventoryResult, Location, ProductId, StockKey};

/// Authoritative quantity state of one product at one location.
///
/// Invariant: `0 <= reserved_quantity <= total_quantity`.
///
/// Available quantity is derived on every read and never stored. Every
/// transition below returns a new record and leaves `self` untouched, so a
/// caller can validate, journal, and only then swap the new state in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    id: InventoryRecordId,
    key: StockKey,
    total_quantity: i64,
    reserved_quantity: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// A fresh record with no stock, created on first intake.
    pub fn open(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            id: InventoryRecordId::new(),
            key,
            total_quantity: 0,
            reserved_quantity: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a record from persisted state, re-checking its invariant.
    pub fn restore(
        id: InventoryRecordId,
        key: StockKey,
        total_quantity: i64,
        reserved_quantity: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> InventoryResult<Self> {
        let record = Self {
            id,
            key,
            total_quantity: 0,
            reserved_quantity: 0,
            created_at,
            updated_at,
        };
        record.with_quantities(total_quantity, reserved_quantity, updated_at)
    }

    pub fn id_typed(&self) -> InventoryRecordId {
        self.id
    }

    pub fn key(&self) -> &StockKey {
        &self.key
    }

    pub fn product_id(&self) -> &ProductId {
        &self.key.product_id
    }

    pub fn location(&self) -> &Location {
        &self.key.location
    }

    pub fn total_quantity(&self) -> i64 {
        self.total_quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.total_quantity - self.reserved_quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Add received stock to the total.
    pub fn receive(&self, quantity: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        let total = self
            .total_quantity
            .checked_add(quantity)
            .ok_or_else(|| InventoryError::invalid_argument("quantity overflows total quantity"))?;
        self.with_quantities(total, self.reserved_quantity, now)
    }

    /// Move `quantity` from available to reserved.
    pub fn reserve(&self, quantity: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        let available = self.available_quantity();
        if quantity > available {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available,
            });
        }
        self.with_quantities(self.total_quantity, self.reserved_quantity + quantity, now)
    }

    /// Return `quantity` from reserved to available.
    pub fn release(&self, quantity: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        if quantity > self.reserved_quantity {
            return Err(InventoryError::invalid_state(format!(
                "cannot release {quantity}: only {} reserved",
                self.reserved_quantity
            )));
        }
        self.with_quantities(self.total_quantity, self.reserved_quantity - quantity, now)
    }

    /// Ship reserved stock: both total and reserved drop by `quantity`.
    pub fn consume(&self, quantity: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        if quantity > self.reserved_quantity {
            return Err(InventoryError::invalid_state(format!(
                "cannot consume {quantity}: only {} reserved",
                self.reserved_quantity
            )));
        }
        self.with_quantities(
            self.total_quantity - quantity,
            self.reserved_quantity - quantity,
            now,
        )
    }

    /// Apply a signed correction to the total.
    pub fn adjust(&self, delta: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        if delta == 0 {
            return Err(InventoryError::invalid_argument("delta cannot be zero"));
        }
        let total = self
            .total_quantity
            .checked_add(delta)
            .ok_or_else(|| InventoryError::invalid_argument("delta overflows total quantity"))?;
        self.with_quantities(total, self.reserved_quantity, now)
    }

    /// Whether the record may be deleted.
    pub fn is_removable(&self) -> bool {
        self.reserved_quantity == 0
    }

    /// Zero out the record ahead of deletion. Refused while stock is reserved.
    pub fn drain(&self, now: DateTime<Utc>) -> InventoryResult<Self> {
        if !self.is_removable() {
            return Err(InventoryError::invalid_state(format!(
                "{} still has {} reserved",
                self.key, self.reserved_quantity
            )));
        }
        self.with_quantities(0, 0, now)
    }

    fn with_quantities(&self, total: i64, reserved: i64, now: DateTime<Utc>) -> InventoryResult<Self> {
        if total < 0 {
            return Err(InventoryError::invalid_state("total quantity cannot go negative"));
        }
        if reserved < 0 {
            return Err(InventoryError::invalid_state("reserved quantity cannot go negative"));
        }
        if reserved > total {
            return Err(InventoryError::invalid_state(format!(
                "reserved quantity {reserved} would exceed total quantity {total}"
            )));
        }
        Ok(Self {
            id: self.id,
            key: self.key.clone(),
            total_quantity: total,
            reserved_quantity: reserved,
            created_at: self.created_at,
            updated_at: now,
        })
    }
}

pub(crate) fn ensure_positive(quantity: i64) -> InventoryResult<()> {
    if quantity <= 0 {
        return Err(InventoryError::invalid_argument(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}
