use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use censudx_core::{InventoryError, InventoryRecordId, InventoryResult};
use censudx_events::LowStockAlert;

use super::r#trait::{AlertStore, LowStockAlertRecord};

#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<HashMap<InventoryRecordId, LowStockAlertRecord>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert row, resolved or not.
    pub fn all(&self) -> Vec<LowStockAlertRecord> {
        self.alerts
            .read()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> InventoryError {
    InventoryError::unavailable("alert store lock poisoned")
}

impl AlertStore for InMemoryAlertStore {
    fn upsert(&self, alert: &LowStockAlert, now: DateTime<Utc>) -> InventoryResult<LowStockAlertRecord> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned())?;
        let next = match alerts.get(&alert.inventory_record_id) {
            Some(existing) => existing.retriggered(alert.clone(), now),
            None => LowStockAlertRecord::raised(alert.clone(), now),
        };
        alerts.insert(alert.inventory_record_id, next.clone());
        Ok(next)
    }

    fn resolve(
        &self,
        inventory_record_id: InventoryRecordId,
        now: DateTime<Utc>,
    ) -> InventoryResult<Option<LowStockAlertRecord>> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned())?;
        match alerts.get_mut(&inventory_record_id) {
            Some(alert) if !alert.is_resolved() => {
                alert.resolved_at = Some(now);
                alert.updated_at = now;
                Ok(Some(alert.clone()))
            }
            _ => Ok(None),
        }
    }

    fn unresolved(&self) -> InventoryResult<Vec<LowStockAlertRecord>> {
        let alerts = self.alerts.read().map_err(|_| poisoned())?;
        let mut open: Vec<LowStockAlertRecord> = alerts.values().filter(|a| !a.is_resolved()).cloned().collect();
        open.sort_by(|a, b| {
            (&a.alert.product_id, &a.alert.location).cmp(&(&b.alert.product_id, &b.alert.location))
        });
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use censudx_core::{Location, ProductId};
    use censudx_events::Severity;
    use chrono::Duration;

    fn alert(id: InventoryRecordId, quantity: i64) -> LowStockAlert {
        LowStockAlert {
            inventory_record_id: id,
            product_id: ProductId::parse("product_123").unwrap(),
            location: Location::parse("warehouse_a").unwrap(),
            current_quantity: quantity,
            threshold: 10,
            severity: if quantity == 0 { Severity::Critical } else { Severity::Warning },
        }
    }

    #[test]
    fn retrigger_refreshes_open_alert_in_place() {
        let store = InMemoryAlertStore::new();
        let id = InventoryRecordId::new();
        let t0 = Utc::now();

        let first = store.upsert(&alert(id, 5), t0).unwrap();
        let second = store.upsert(&alert(id, 0), t0 + Duration::seconds(1)).unwrap();

        assert_eq!(second.raised_at, first.raised_at);
        assert_eq!(second.alert.severity, Severity::Critical);
        assert_eq!(store.unresolved().unwrap().len(), 1);
    }

    #[test]
    fn resolve_then_retrigger_reopens() {
        let store = InMemoryAlertStore::new();
        let id = InventoryRecordId::new();
        let t0 = Utc::now();
        store.upsert(&alert(id, 5), t0).unwrap();

        let resolved = store.resolve(id, t0 + Duration::seconds(1)).unwrap().unwrap();
        assert!(resolved.is_resolved());
        assert!(store.unresolved().unwrap().is_empty());
        assert!(store.resolve(id, t0 + Duration::seconds(2)).unwrap().is_none());

        let reopened = store.upsert(&alert(id, 3), t0 + Duration::seconds(3)).unwrap();
        assert!(!reopened.is_resolved());
        assert_eq!(reopened.raised_at, t0 + Duration::seconds(3));
    }
}
