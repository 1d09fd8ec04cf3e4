use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use censudx_core::{CorrelationId, InventoryResult, Location, ProductId, ReferenceId, StockKey};
use censudx_inventory::{InventoryRecord, Reservation, ReservationKey, StockChange};

use crate::transaction_log::TransactionLog;

/// Write-ahead sink for ledger mutations.
///
/// Called inside the per-key exclusive section, after the new state has been
/// computed and before it becomes visible. An error discards the mutation.
pub trait ChangeJournal: Send + Sync {
    fn record(&self, change: &StockChange) -> InventoryResult<()>;

    /// A reservation changed state without moving any quantity (mark-only
    /// commit).
    fn record_reservation(&self, _reservation: &Reservation) -> InventoryResult<()> {
        Ok(())
    }

    /// The record behind `change` is about to be deleted.
    fn record_removal(&self, change: &StockChange) -> InventoryResult<()> {
        self.record(change)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

impl<L> ChangeJournal for L
where
    L: TransactionLog + ?Sized,
{
    fn is_healthy(&self) -> bool {
        TransactionLog::is_healthy(self)
    }

    fn record(&self, change: &StockChange) -> InventoryResult<()> {
        let sequence_number = self.append(change.to_transaction())?;
        tracing::debug!(
            sequence_number,
            product_id = %change.after.product_id(),
            location = %change.after.location(),
            transaction_type = %change.transaction_type,
            "ledger change journaled"
        );
        Ok(())
    }
}

/// Sees every committed change while the key it belongs to is still locked.
///
/// Calls for one key therefore arrive in commit order. Implementations must
/// not call back into the ledger and must not fail; they run after the
/// change is durable and visible.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, change: &StockChange);

    /// The record was deleted; `change` drains it to zero.
    fn on_remove(&self, change: &StockChange) {
        self.on_commit(change)
    }
}

impl<O> CommitObserver for Arc<O>
where
    O: CommitObserver + ?Sized,
{
    fn on_commit(&self, change: &StockChange) {
        (**self).on_commit(change)
    }

    fn on_remove(&self, change: &StockChange) {
        (**self).on_remove(change)
    }
}

/// Ledger state as persisted: every record and every reservation still on
/// file, terminal ones included so replays stay idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub records: Vec<InventoryRecord>,
    pub reservations: Vec<Reservation>,
}

/// Caller context carried into every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeContext {
    pub correlation_id: CorrelationId,
    pub reason: Option<String>,
    pub now: DateTime<Utc>,
}

impl ChangeContext {
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            reason: None,
            now: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

impl Default for ChangeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What `commit` does to quantities.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Mark the reservation committed; stock stays reserved until `consume`.
    MarkOnly,
    /// Commit and consume in one step: total and reserved both drop.
    #[default]
    Consume,
}

impl core::str::FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark_only" => Ok(CommitPolicy::MarkOnly),
            "consume" => Ok(CommitPolicy::Consume),
            other => Err(format!("unknown commit policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub product_id: ProductId,
    pub location: Location,
    pub quantity: i64,
    pub reference_id: ReferenceId,
    /// Pending reservations expire after this long; `None` never expires.
    pub ttl: Option<Duration>,
}

impl ReserveRequest {
    pub fn new(
        product_id: ProductId,
        location: Location,
        quantity: i64,
        reference_id: ReferenceId,
    ) -> Self {
        Self {
            product_id,
            location,
            quantity,
            reference_id,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.location.clone())
    }

    pub fn reservation_key(&self) -> ReservationKey {
        ReservationKey::new(self.product_id.clone(), self.reference_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A new reservation was taken against available stock.
    Created(StockChange),
    /// The reference was already reserved; nothing changed.
    Replayed(Reservation),
}

impl ReserveOutcome {
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            ReserveOutcome::Created(change) => change.reservation.as_ref(),
            ReserveOutcome::Replayed(reservation) => Some(reservation),
        }
    }

    pub fn change(&self) -> Option<&StockChange> {
        match self {
            ReserveOutcome::Created(change) => Some(change),
            ReserveOutcome::Replayed(_) => None,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, ReserveOutcome::Replayed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub reservation: Reservation,
    /// The `OUT` change when stock was consumed; `None` for a mark-only
    /// commit or a repeated call.
    pub change: Option<StockChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub current_stock: i64,
    pub available_stock: i64,
    pub requested_quantity: i64,
}

/// Result of one expiry pass. Keys whose journal append failed keep their
/// reservations pending and are retried on the next pass.
#[derive(Debug, Default)]
pub struct ExpirySweep {
    pub changes: Vec<StockChange>,
    pub failures: Vec<(ReservationKey, censudx_core::InventoryError)>,
}

impl ExpirySweep {
    pub fn expired(&self) -> usize {
        self.changes.len()
    }
}

/// Authoritative per-(product, location) quantity state.
///
/// Every mutation is atomic per key, is journaled before it becomes visible,
/// and returns the committed [`StockChange`]. Different keys never block each
/// other.
pub trait QuantityLedger: Send + Sync {
    fn get(&self, key: &StockKey) -> InventoryResult<InventoryRecord>;

    /// Every record, ordered by (product_id, location).
    fn list(&self) -> InventoryResult<Vec<InventoryRecord>>;

    fn check_availability(&self, key: &StockKey, requested_quantity: i64) -> InventoryResult<Availability>;

    fn reservation(&self, key: &ReservationKey) -> InventoryResult<Reservation>;

    /// Stock intake; creates the record on first receipt.
    fn receive(&self, key: &StockKey, quantity: i64, ctx: &ChangeContext) -> InventoryResult<StockChange>;

    fn reserve(&self, request: ReserveRequest, ctx: &ChangeContext) -> InventoryResult<ReserveOutcome>;

    /// `None` when the reservation was already released.
    fn release(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>>;

    fn commit(
        &self,
        key: &ReservationKey,
        policy: CommitPolicy,
        ctx: &ChangeContext,
    ) -> InventoryResult<CommitOutcome>;

    /// Complete a mark-only commit. `None` when already consumed.
    fn consume(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>>;

    fn adjust(&self, key: &StockKey, delta: i64, ctx: &ChangeContext) -> InventoryResult<StockChange>;

    /// Delete a record with nothing reserved. Logged as an `ADJUST` to zero.
    fn remove(&self, key: &StockKey, ctx: &ChangeContext) -> InventoryResult<StockChange>;

    /// Expire every pending reservation due at `ctx.now`.
    fn expire_due(&self, ctx: &ChangeContext) -> InventoryResult<ExpirySweep>;

    /// Register an observer for every change committed from now on.
    fn subscribe(&self, observer: Arc<dyn CommitObserver>);

    fn is_healthy(&self) -> bool;
}

impl<L> QuantityLedger for Arc<L>
where
    L: QuantityLedger + ?Sized,
{
    fn get(&self, key: &StockKey) -> InventoryResult<InventoryRecord> {
        (**self).get(key)
    }

    fn list(&self) -> InventoryResult<Vec<InventoryRecord>> {
        (**self).list()
    }

    fn check_availability(&self, key: &StockKey, requested_quantity: i64) -> InventoryResult<Availability> {
        (**self).check_availability(key, requested_quantity)
    }

    fn reservation(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        (**self).reservation(key)
    }

    fn receive(&self, key: &StockKey, quantity: i64, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        (**self).receive(key, quantity, ctx)
    }

    fn reserve(&self, request: ReserveRequest, ctx: &ChangeContext) -> InventoryResult<ReserveOutcome> {
        (**self).reserve(request, ctx)
    }

    fn release(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>> {
        (**self).release(key, ctx)
    }

    fn commit(
        &self,
        key: &ReservationKey,
        policy: CommitPolicy,
        ctx: &ChangeContext,
    ) -> InventoryResult<CommitOutcome> {
        (**self).commit(key, policy, ctx)
    }

    fn consume(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>> {
        (**self).consume(key, ctx)
    }

    fn adjust(&self, key: &StockKey, delta: i64, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        (**self).adjust(key, delta, ctx)
    }

    fn remove(&self, key: &StockKey, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        (**self).remove(key, ctx)
    }

    fn expire_due(&self, ctx: &ChangeContext) -> InventoryResult<ExpirySweep> {
        (**self).expire_due(ctx)
    }

    fn subscribe(&self, observer: Arc<dyn CommitObserver>) {
        (**self).subscribe(observer)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
