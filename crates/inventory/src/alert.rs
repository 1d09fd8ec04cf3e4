//! Low-stock evaluation.

use std::collections::HashMap;

use censudx_core::{ProductId, StockKey};
use censudx_events::{LowStockAlert, Severity};

use crate::record::InventoryRecord;

/// Threshold used when nothing more specific is configured.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Derive a low-stock alert from a record's current state.
///
/// Pure: alerts when `available <= threshold`, `critical` when nothing is
/// available, `warning` otherwise.
pub fn evaluate(record: &InventoryRecord, threshold: i64) -> Option<LowStockAlert> {
    let available = record.available_quantity();
    if available > threshold {
        return None;
    }

    let severity = if available == 0 {
        Severity::Critical
    } else {
        Severity::Warning
    };

    Some(LowStockAlert {
        inventory_record_id: record.id_typed(),
        product_id: record.product_id().clone(),
        location: record.location().clone(),
        current_quantity: available,
        threshold,
        severity,
    })
}

/// Low-stock thresholds: per (product, location), then per product, then a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPolicy {
    default_threshold: i64,
    per_product: HashMap<ProductId, i64>,
    per_key: HashMap<StockKey, i64>,
}

impl ThresholdPolicy {
    pub fn new(default_threshold: i64) -> Self {
        Self {
            default_threshold,
            per_product: HashMap::new(),
            per_key: HashMap::new(),
        }
    }

    pub fn with_product(mut self, product_id: ProductId, threshold: i64) -> Self {
        self.per_product.insert(product_id, threshold);
        self
    }

    pub fn with_key(mut self, key: StockKey, threshold: i64) -> Self {
        self.per_key.insert(key, threshold);
        self
    }

    pub fn default_threshold(&self) -> i64 {
        self.default_threshold
    }

    pub fn threshold_for(&self, key: &StockKey) -> i64 {
        self.per_key
            .get(key)
            .or_else(|| self.per_product.get(&key.product_id))
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn evaluate(&self, record: &InventoryRecord) -> Option<LowStockAlert> {
        evaluate(record, self.threshold_for(record.key()))
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_STOCK_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn key() -> StockKey {
        StockKey::parse("product_123", "warehouse_a").unwrap()
    }

    fn record(total: i64, reserved: i64) -> InventoryRecord {
        let now = Utc::now();
        let mut record = InventoryRecord::open(key(), now);
        if total > 0 {
            record = record.receive(total, now).unwrap();
        }
        if reserved > 0 {
            record = record.reserve(reserved, now).unwrap();
        }
        record
    }

    #[test]
    fn fully_reserved_stock_is_critical() {
        let alert = evaluate(&record(10, 10), 10).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.current_quantity, 0);
        assert_eq!(alert.threshold, 10);
    }

    #[test]
    fn at_threshold_is_warning_above_is_none() {
        assert_eq!(evaluate(&record(5, 0), 10).unwrap().severity, Severity::Warning);
        assert_eq!(evaluate(&record(10, 0), 10).unwrap().severity, Severity::Warning);
        assert!(evaluate(&record(11, 0), 10).is_none());
    }

    #[test]
    fn most_specific_threshold_wins() {
        let policy = ThresholdPolicy::new(10)
            .with_product(ProductId::parse("product_123").unwrap(), 20)
            .with_key(key(), 3);
        assert_eq!(policy.threshold_for(&key()), 3);
        assert_eq!(
            policy.threshold_for(&StockKey::parse("product_123", "warehouse_b").unwrap()),
            20
        );
        assert_eq!(
            policy.threshold_for(&StockKey::parse("other", "warehouse_a").unwrap()),
            10
        );
    }

    proptest! {
        /// Property: critical iff available == 0, warning iff
        /// 0 < available <= threshold, none otherwise.
        #[test]
        fn classification_matches_available_quantity(
            total in 0i64..500,
            reserved_share in 0.0f64..=1.0,
            threshold in 0i64..100,
        ) {
            let reserved = ((total as f64) * reserved_share).floor() as i64;
            let record = record(total, reserved);
            let available = record.available_quantity();

            match evaluate(&record, threshold) {
                Some(alert) if available == 0 => prop_assert_eq!(alert.severity, Severity::Critical),
                Some(alert) => {
                    prop_assert!(available <= threshold);
                    prop_assert_eq!(alert.severity, Severity::Warning);
                }
                None => prop_assert!(available > threshold),
            }
        }
    }
}
