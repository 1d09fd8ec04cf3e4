use serde::{Deserialize, Serialize};
use std::sync::Arc;

use censudx_core::{InventoryRecordId, InventoryResult, StockKey};
use censudx_inventory::{NewTransaction, TransactionRecord};

const DEFAULT_PAGE_LIMIT: u32 = 50;
const MAX_PAGE_LIMIT: u32 = 1000;

/// Page request for transaction history (newest first).
///
/// The limit is always within `1..=1000`; build one with [`PageRequest::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    limit: u32,
    before: Option<u64>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl PageRequest {
    pub fn new(limit: Option<u32>, before: Option<u64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            before,
        }
    }

    /// Maximum number of entries to return.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Only entries with a sequence number strictly below this one.
    pub fn before(&self) -> Option<u64> {
        self.before
    }

    /// The request for the page following `page`, if there is one.
    pub fn after(&self, page: &TransactionPage) -> Option<Self> {
        page.next_before.map(|before| Self {
            limit: self.limit,
            before: Some(before),
        })
    }
}

/// One page of transaction history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    /// Cursor for the next (older) page; `None` once history is exhausted.
    pub next_before: Option<u64>,
}

impl TransactionPage {
    pub(crate) fn from_newest_first(mut transactions: Vec<TransactionRecord>, limit: u32) -> Self {
        let has_more = transactions.len() > limit as usize;
        transactions.truncate(limit as usize);
        let next_before = if has_more {
            transactions.last().map(|t| t.sequence_number)
        } else {
            None
        };
        Self {
            transactions,
            next_before,
        }
    }
}

/// Append-only history of quantity-affecting operations.
///
/// ## Append Semantics
///
/// `append()` is the only write. It assigns a strictly increasing
/// `sequence_number` and fails only when the storage medium is unreachable
/// (`InventoryError::Unavailable`). A ledger mutation is not complete until
/// its append succeeds; the ledger performs the append inside its per-key
/// exclusive section, so for any key the log order equals the order in which
/// mutations were committed.
///
/// ## Query Semantics
///
/// `query()` and `query_key()` are read-only, newest first, and restartable:
/// pass the previous page's `next_before` to continue. `query()` follows one
/// record id; `query_key()` follows a (product, location) across record
/// removal and re-creation.
pub trait TransactionLog: Send + Sync {
    fn append(&self, transaction: NewTransaction) -> InventoryResult<u64>;

    fn query(
        &self,
        inventory_record_id: InventoryRecordId,
        page: PageRequest,
    ) -> InventoryResult<TransactionPage>;

    fn query_key(&self, key: &StockKey, page: PageRequest) -> InventoryResult<TransactionPage>;

    fn is_healthy(&self) -> bool;
}

impl<L> TransactionLog for Arc<L>
where
    L: TransactionLog + ?Sized,
{
    fn append(&self, transaction: NewTransaction) -> InventoryResult<u64> {
        (**self).append(transaction)
    }

    fn query(
        &self,
        inventory_record_id: InventoryRecordId,
        page: PageRequest,
    ) -> InventoryResult<TransactionPage> {
        (**self).query(inventory_record_id, page)
    }

    fn query_key(&self, key: &StockKey, page: PageRequest) -> InventoryResult<TransactionPage> {
        (**self).query_key(key, page)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PageRequest::new(Some(0), None).limit(), 1);
        assert_eq!(PageRequest::new(Some(5_000), None).limit(), 1000);
        assert_eq!(PageRequest::new(None, Some(9)).limit(), 50);
        assert_eq!(PageRequest::default().before(), None);
    }
}
