use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use censudx_core::{InventoryRecordId, InventoryResult};
use censudx_events::LowStockAlert;

/// Persisted low-stock condition for one inventory record.
///
/// A record has at most one alert row. Re-triggering an unresolved alert
/// refreshes it in place; re-triggering a resolved one re-opens it with a new
/// `raised_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlertRecord {
    #[serde(flatten)]
    pub alert: LowStockAlert,
    pub raised_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LowStockAlertRecord {
    pub fn raised(alert: LowStockAlert, now: DateTime<Utc>) -> Self {
        Self {
            alert,
            raised_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Apply a fresh evaluation of the same record.
    pub fn retriggered(&self, alert: LowStockAlert, now: DateTime<Utc>) -> Self {
        if self.is_resolved() {
            return Self::raised(alert, now);
        }
        Self {
            alert,
            raised_at: self.raised_at,
            updated_at: now,
            resolved_at: None,
        }
    }
}

pub trait AlertStore: Send + Sync {
    fn upsert(&self, alert: &LowStockAlert, now: DateTime<Utc>) -> InventoryResult<LowStockAlertRecord>;

    /// Resolve the open alert for a record. `None` when nothing was open.
    fn resolve(
        &self,
        inventory_record_id: InventoryRecordId,
        now: DateTime<Utc>,
    ) -> InventoryResult<Option<LowStockAlertRecord>>;

    /// Open alerts ordered by (product_id, location).
    fn unresolved(&self) -> InventoryResult<Vec<LowStockAlertRecord>>;
}

impl<S> AlertStore for Arc<S>
where
    S: AlertStore + ?Sized,
{
    fn upsert(&self, alert: &LowStockAlert, now: DateTime<Utc>) -> InventoryResult<LowStockAlertRecord> {
        (**self).upsert(alert, now)
    }

    fn resolve(
        &self,
        inventory_record_id: InventoryRecordId,
        now: DateTime<Utc>,
    ) -> InventoryResult<Option<LowStockAlertRecord>> {
        (**self).resolve(inventory_record_id, now)
    }

    fn unresolved(&self) -> InventoryResult<Vec<LowStockAlertRecord>> {
        (**self).unresolved()
    }
}
