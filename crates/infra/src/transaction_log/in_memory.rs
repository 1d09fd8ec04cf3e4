use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use censudx_core::{InventoryError, InventoryRecordId, InventoryResult, StockKey};
use censudx_inventory::{NewTransaction, TransactionRecord};

use super::r#trait::{PageRequest, TransactionLog, TransactionPage};

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<TransactionRecord>,
    /// Positions in `entries` per inventory record, in append order.
    by_record: HashMap<InventoryRecordId, Vec<usize>>,
    by_key: HashMap<StockKey, Vec<usize>>,
}

impl LogState {
    fn page(&self, positions: Option<&Vec<usize>>, page: PageRequest) -> TransactionPage {
        let Some(positions) = positions else {
            return TransactionPage::from_newest_first(Vec::new(), page.limit());
        };

        // One extra entry tells us whether another page exists.
        let newest_first: Vec<TransactionRecord> = positions
            .iter()
            .rev()
            .map(|&pos| &self.entries[pos])
            .filter(|t| page.before().is_none_or(|before| t.sequence_number < before))
            .take(page.limit() as usize + 1)
            .cloned()
            .collect();

        TransactionPage::from_newest_first(newest_first, page.limit())
    }
}

/// In-memory append-only transaction log.
///
/// Intended for tests/dev. Can be switched offline to exercise the
/// "storage unavailable" path.
#[derive(Debug)]
pub struct InMemoryTransactionLog {
    state: RwLock<LogState>,
    available: AtomicBool,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the storage medium going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every entry in append order.
    pub fn entries(&self) -> Vec<TransactionRecord> {
        self.state
            .read()
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> InventoryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InventoryError::unavailable("transaction log offline"))
        }
    }
}

impl Default for InMemoryTransactionLog {
    fn default() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, transaction: NewTransaction) -> InventoryResult<u64> {
        self.ensure_available()?;

        let mut state = self
            .state
            .write()
            .map_err(|_| InventoryError::unavailable("transaction log lock poisoned"))?;

        let position = state.entries.len();
        let sequence_number = position as u64 + 1;
        let record = transaction.into_record(sequence_number);

        state
            .by_record
            .entry(record.inventory_record_id)
            .or_default()
            .push(position);
        state
            .by_key
            .entry(StockKey::new(record.product_id.clone(), record.location.clone()))
            .or_default()
            .push(position);
        state.entries.push(record);

        Ok(sequence_number)
    }

    fn query(
        &self,
        inventory_record_id: InventoryRecordId,
        page: PageRequest,
    ) -> InventoryResult<TransactionPage> {
        self.ensure_available()?;

        let state = self
            .state
            .read()
            .map_err(|_| InventoryError::unavailable("transaction log lock poisoned"))?;

        Ok(state.page(state.by_record.get(&inventory_record_id), page))
    }

    fn query_key(&self, key: &StockKey, page: PageRequest) -> InventoryResult<TransactionPage> {
        self.ensure_available()?;

        let state = self
            .state
            .read()
            .map_err(|_| InventoryError::unavailable("transaction log lock poisoned"))?;

        Ok(state.page(state.by_key.get(key), page))
    }

    fn is_healthy(&self) -> bool {
        self.available.load(Ordering::SeqCst) && self.state.read().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use censudx_core::{CorrelationId, Location, ProductId, TransactionType};

    fn tx(record_id: InventoryRecordId, delta: i64) -> NewTransaction {
        NewTransaction {
            inventory_record_id: record_id,
            product_id: ProductId::parse("product_123").unwrap(),
            location: Location::parse("warehouse_a").unwrap(),
            transaction_type: TransactionType::Adjust,
            quantity_delta: delta,
            resulting_total: delta,
            resulting_reserved: 0,
            reason: None,
            reference_id: None,
            correlation_id: CorrelationId::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let log = InMemoryTransactionLog::new();
        let id = InventoryRecordId::new();
        assert_eq!(log.append(tx(id, 1)).unwrap(), 1);
        assert_eq!(log.append(tx(id, 2)).unwrap(), 2);
        assert_eq!(log.append(tx(InventoryRecordId::new(), 3)).unwrap(), 3);
    }

    #[test]
    fn query_pages_newest_first_and_restarts_from_cursor() {
        let log = InMemoryTransactionLog::new();
        let id = InventoryRecordId::new();
        let other = InventoryRecordId::new();
        for delta in 1..=5 {
            log.append(tx(id, delta)).unwrap();
            log.append(tx(other, delta)).unwrap();
        }

        let request = PageRequest::new(Some(2), None);
        let first = log.query(id, request).unwrap();
        let deltas: Vec<i64> = first.transactions.iter().map(|t| t.quantity_delta).collect();
        assert_eq!(deltas, vec![5, 4]);
        assert!(first.next_before.is_some());

        let second = log.query(id, request.after(&first).unwrap()).unwrap();
        let deltas: Vec<i64> = second.transactions.iter().map(|t| t.quantity_delta).collect();
        assert_eq!(deltas, vec![3, 2]);

        let third = log.query(id, request.after(&second).unwrap()).unwrap();
        assert_eq!(third.transactions.len(), 1);
        assert_eq!(third.next_before, None);
        assert!(request.after(&third).is_none());
    }

    #[test]
    fn key_query_spans_record_ids() {
        let log = InMemoryTransactionLog::new();
        let removed = InventoryRecordId::new();
        let recreated = InventoryRecordId::new();
        log.append(tx(removed, 1)).unwrap();
        log.append(tx(removed, -1)).unwrap();
        log.append(tx(recreated, 7)).unwrap();

        let mut elsewhere = tx(InventoryRecordId::new(), 3);
        elsewhere.location = Location::parse("warehouse_b").unwrap();
        log.append(elsewhere).unwrap();

        let key = StockKey::parse("product_123", "warehouse_a").unwrap();
        let page = log.query_key(&key, PageRequest::default()).unwrap();
        let deltas: Vec<i64> = page.transactions.iter().map(|t| t.quantity_delta).collect();
        assert_eq!(deltas, vec![7, -1, 1]);
        assert_eq!(log.query(recreated, PageRequest::default()).unwrap().transactions.len(), 1);
    }

    #[test]
    fn offline_log_rejects_appends() {
        let log = InMemoryTransactionLog::new();
        log.set_available(false);
        let err = log.append(tx(InventoryRecordId::new(), 1)).unwrap_err();
        assert!(matches!(err, InventoryError::Unavailable(_)));
        assert!(!log.is_healthy());
        assert!(log.is_empty());
    }
}
