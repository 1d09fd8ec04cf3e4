//! In-memory quantity ledger.
//!
//! ## Locking
//!
//! State is split per [`StockKey`] into independent slots held in an arena
//! (`RwLock<HashMap<StockKey, Arc<Mutex<KeySlot>>>>`). The arena write lock is
//! only taken to insert a slot for a key seen for the first time; every
//! mutation runs under that key's mutex alone, so unrelated keys never
//! contend.
//!
//! A reservation is identified by `(product_id, reference_id)` across all
//! locations, so a small index maps each claimed reservation key to the
//! location it lives at. Lock order is always slot, then index; the index is
//! never held while acquiring a slot.
//!
//! ## Observers
//!
//! [`CommitObserver`]s run inside the key's section right after the new
//! state is swapped in, so everything they emit for one key follows commit
//! order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use censudx_core::{InventoryError, InventoryResult, Location, ReferenceId, StockKey, TransactionType};
use censudx_inventory::{InventoryRecord, Reservation, ReservationKey, StockChange, Transition};
use tracing::{info, instrument, warn};

use super::r#trait::{
    Availability, ChangeContext, ChangeJournal, CommitObserver, CommitOutcome, CommitPolicy, ExpirySweep,
    LedgerSnapshot, QuantityLedger, ReserveOutcome, ReserveRequest,
};

/// Upper bound on re-reads when a concurrent reserve or remove moves a
/// reservation claim between our reads.
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[derive(Debug, Default)]
struct KeySlot {
    /// `None` until first intake and after removal.
    record: Option<InventoryRecord>,
    reservations: HashMap<ReferenceId, Reservation>,
}

impl KeySlot {
    fn record(&self, key: &StockKey) -> InventoryResult<&InventoryRecord> {
        self.record.as_ref().ok_or_else(|| record_not_found(key))
    }

    fn held_quantity(&self) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.holds_stock())
            .map(|r| r.quantity())
            .sum()
    }
}

pub struct InMemoryLedger {
    slots: RwLock<HashMap<StockKey, Arc<Mutex<KeySlot>>>>,
    index: Mutex<HashMap<ReservationKey, Location>>,
    journal: Arc<dyn ChangeJournal>,
    observers: RwLock<Vec<Arc<dyn CommitObserver>>>,
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("keys", &self.slots.read().map(|s| s.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl InMemoryLedger {
    pub fn new(journal: Arc<dyn ChangeJournal>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            journal,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a ledger from persisted state.
    ///
    /// Every reservation must belong to a restored record, and each record's
    /// reserved quantity must equal what its reservations still hold.
    pub fn restore(journal: Arc<dyn ChangeJournal>, snapshot: LedgerSnapshot) -> InventoryResult<Self> {
        let mut slots: HashMap<StockKey, KeySlot> = HashMap::new();
        for record in snapshot.records {
            let key = record.key().clone();
            let slot = KeySlot {
                record: Some(record),
                reservations: HashMap::new(),
            };
            if slots.insert(key.clone(), slot).is_some() {
                return Err(InventoryError::invalid_state(format!("duplicate inventory record for {key}")));
            }
        }

        let mut index = HashMap::new();
        for reservation in snapshot.reservations {
            let stock_key = reservation.stock_key();
            let Some(slot) = slots.get_mut(&stock_key) else {
                return Err(InventoryError::invalid_state(format!(
                    "reservation {} has no inventory record at {stock_key}",
                    reservation.key()
                )));
            };
            if index
                .insert(reservation.key().clone(), reservation.location().clone())
                .is_some()
            {
                return Err(InventoryError::invalid_state(format!(
                    "duplicate reservation {}",
                    reservation.key()
                )));
            }
            slot.reservations.insert(reservation.reference_id().clone(), reservation);
        }

        for (key, slot) in &slots {
            let reserved = slot.record(key)?.reserved_quantity();
            let held = slot.held_quantity();
            if held != reserved {
                return Err(InventoryError::invalid_state(format!(
                    "{key} reserves {reserved} but its reservations hold {held}"
                )));
            }
        }

        info!(records = slots.len(), reservations = index.len(), "ledger state restored");
        Ok(Self {
            slots: RwLock::new(
                slots
                    .into_iter()
                    .map(|(key, slot)| (key, Arc::new(Mutex::new(slot))))
                    .collect(),
            ),
            index: Mutex::new(index),
            journal,
            observers: RwLock::new(Vec::new()),
        })
    }

    fn observers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn CommitObserver>>> {
        self.observers.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tell observers about a change that was just swapped in.
    fn notify(&self, change: &StockChange) {
        for observer in self.observers().iter() {
            observer.on_commit(change);
        }
    }

    fn notify_removal(&self, change: &StockChange) {
        for observer in self.observers().iter() {
            observer.on_remove(change);
        }
    }

    fn slot(&self, key: &StockKey) -> InventoryResult<Option<Arc<Mutex<KeySlot>>>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| InventoryError::unavailable("ledger arena lock poisoned"))?;
        Ok(slots.get(key).cloned())
    }

    fn slot_or_insert(&self, key: &StockKey) -> InventoryResult<Arc<Mutex<KeySlot>>> {
        if let Some(slot) = self.slot(key)? {
            return Ok(slot);
        }
        let mut slots = self
            .slots
            .write()
            .map_err(|_| InventoryError::unavailable("ledger arena lock poisoned"))?;
        Ok(slots.entry(key.clone()).or_default().clone())
    }

    fn existing_slot(&self, key: &StockKey) -> InventoryResult<Arc<Mutex<KeySlot>>> {
        self.slot(key)?.ok_or_else(|| record_not_found(key))
    }

    fn all_slots(&self) -> InventoryResult<Vec<(StockKey, Arc<Mutex<KeySlot>>)>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| InventoryError::unavailable("ledger arena lock poisoned"))?;
        Ok(slots.iter().map(|(k, s)| (k.clone(), s.clone())).collect())
    }

    fn lock_index(&self) -> InventoryResult<MutexGuard<'_, HashMap<ReservationKey, Location>>> {
        self.index
            .lock()
            .map_err(|_| InventoryError::unavailable("reservation index lock poisoned"))
    }

    fn claimed_location(&self, key: &ReservationKey) -> InventoryResult<Option<Location>> {
        Ok(self.lock_index()?.get(key).cloned())
    }

    /// Journal a computed change before it is swapped in.
    fn journal(&self, change: &StockChange) -> InventoryResult<()> {
        self.journal
            .record(change)
            .inspect_err(|err| journal_failed(change.after.key(), change.transaction_type.as_str(), err))
    }

    /// Run `f` on the slot holding reservation `key`, with that slot locked.
    fn with_reservation<R>(
        &self,
        key: &ReservationKey,
        f: impl FnOnce(&mut KeySlot, &StockKey, Reservation) -> InventoryResult<R>,
    ) -> InventoryResult<R> {
        let location = self
            .claimed_location(key)?
            .ok_or_else(|| reservation_not_found(key))?;
        let stock_key = StockKey::new(key.product_id.clone(), location);
        let slot = self.slot(&stock_key)?.ok_or_else(|| reservation_not_found(key))?;
        let mut guard = lock_slot(&slot)?;
        let reservation = guard
            .reservations
            .get(&key.reference_id)
            .cloned()
            .ok_or_else(|| reservation_not_found(key))?;
        f(&mut guard, &stock_key, reservation)
    }

    fn replay(&self, request: &ReserveRequest, existing: Reservation) -> ReserveOutcome {
        if existing.quantity() != request.quantity || existing.location() != &request.location {
            warn!(
                product_id = %request.product_id,
                reference_id = %request.reference_id,
                existing_location = %existing.location(),
                existing_quantity = existing.quantity(),
                requested_location = %request.location,
                requested_quantity = request.quantity,
                "reservation replayed with different parameters; returning existing reservation"
            );
        }
        ReserveOutcome::Replayed(existing)
    }

    fn expire_one(
        &self,
        slot: &KeySlot,
        stock_key: &StockKey,
        reservation: &Reservation,
        ctx: &ChangeContext,
    ) -> InventoryResult<(InventoryRecord, Reservation, StockChange)> {
        let expired = reservation.expire(ctx.now)?;
        let before = slot.record(stock_key)?.clone();
        let after = before.release(expired.quantity(), ctx.now)?;
        let change = change(TransactionType::Release, before, after.clone(), Some(expired.clone()), ctx);
        self.journal(&change)?;
        Ok((after, expired, change))
    }

    /// Shared tail of commit/consume: ship the reservation's stock.
    fn apply_consume(
        &self,
        slot: &mut KeySlot,
        stock_key: &StockKey,
        consumed: Reservation,
        ctx: &ChangeContext,
    ) -> InventoryResult<StockChange> {
        let before = slot.record(stock_key)?.clone();
        let after = before.consume(consumed.quantity(), ctx.now)?;
        let change = change(TransactionType::Out, before, after.clone(), Some(consumed.clone()), ctx);
        self.journal(&change)?;

        slot.record = Some(after);
        slot.reservations.insert(consumed.reference_id().clone(), consumed);
        self.notify(&change);
        Ok(change)
    }
}

impl QuantityLedger for InMemoryLedger {
    fn get(&self, key: &StockKey) -> InventoryResult<InventoryRecord> {
        let slot = self.existing_slot(key)?;
        let guard = lock_slot(&slot)?;
        guard.record(key).cloned()
    }

    fn list(&self) -> InventoryResult<Vec<InventoryRecord>> {
        let mut records = Vec::new();
        for (_, slot) in self.all_slots()? {
            if let Some(record) = &lock_slot(&slot)?.record {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(records)
    }

    fn check_availability(&self, key: &StockKey, requested_quantity: i64) -> InventoryResult<Availability> {
        if requested_quantity <= 0 {
            return Err(InventoryError::invalid_argument("requested quantity must be positive"));
        }
        let record = self.get(key)?;
        Ok(Availability {
            available: requested_quantity <= record.available_quantity(),
            current_stock: record.total_quantity(),
            available_stock: record.available_quantity(),
            requested_quantity,
        })
    }

    fn reservation(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        self.with_reservation(key, |_, _, reservation| Ok(reservation))
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, location = %key.location), err)]
    fn receive(&self, key: &StockKey, quantity: i64, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        let slot = self.slot_or_insert(key)?;
        let mut guard = lock_slot(&slot)?;

        let before = guard
            .record
            .clone()
            .unwrap_or_else(|| InventoryRecord::open(key.clone(), ctx.now));
        let after = before.receive(quantity, ctx.now)?;
        let change = change(TransactionType::In, before, after.clone(), None, ctx);
        self.journal(&change)?;

        guard.record = Some(after);
        self.notify(&change);
        Ok(change)
    }

    #[instrument(
        skip(self, request, ctx),
        fields(
            product_id = %request.product_id,
            location = %request.location,
            reference_id = %request.reference_id,
            quantity = request.quantity
        ),
        err
    )]
    fn reserve(&self, request: ReserveRequest, ctx: &ChangeContext) -> InventoryResult<ReserveOutcome> {
        let stock_key = request.stock_key();
        let reservation_key = request.reservation_key();

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            if self.claimed_location(&reservation_key)?.is_some() {
                match self.reservation(&reservation_key) {
                    Ok(existing) => return Ok(self.replay(&request, existing)),
                    // Claim vanished between reads (failed journal or removal).
                    Err(InventoryError::NotFound(_)) => continue,
                    Err(err) => return Err(err),
                }
            }

            let slot = self.existing_slot(&stock_key)?;
            let mut guard = lock_slot(&slot)?;

            let mut index = self.lock_index()?;
            if index.contains_key(&reservation_key) {
                // Claimed concurrently; go back and replay it.
                continue;
            }

            let before = guard.record(&stock_key)?.clone();
            let reservation = Reservation::pending(
                reservation_key.clone(),
                request.location.clone(),
                request.quantity,
                request.ttl,
                ctx.now,
            )?;
            let after = before.reserve(request.quantity, ctx.now)?;
            index.insert(reservation_key.clone(), request.location.clone());
            drop(index);

            let change = change(TransactionType::Reserve, before, after.clone(), Some(reservation.clone()), ctx);
            if let Err(err) = self.journal(&change) {
                if let Ok(mut index) = self.index.lock() {
                    index.remove(&reservation_key);
                }
                return Err(err);
            }

            guard.record = Some(after);
            guard.reservations.insert(request.reference_id.clone(), reservation);
            self.notify(&change);
            return Ok(ReserveOutcome::Created(change));
        }

        Err(InventoryError::unavailable(format!(
            "reservation {reservation_key} kept changing under contention"
        )))
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    fn release(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>> {
        self.with_reservation(key, |slot, stock_key, reservation| {
            let released = match reservation.release(ctx.now)? {
                Transition::Applied(released) => released,
                Transition::Unchanged => return Ok(None),
            };

            let before = slot.record(stock_key)?.clone();
            let after = before.release(released.quantity(), ctx.now)?;
            let change = change(TransactionType::Release, before, after.clone(), Some(released.clone()), ctx);
            self.journal(&change)?;

            slot.record = Some(after);
            slot.reservations.insert(key.reference_id.clone(), released);
            self.notify(&change);
            Ok(Some(change))
        })
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    fn commit(
        &self,
        key: &ReservationKey,
        policy: CommitPolicy,
        ctx: &ChangeContext,
    ) -> InventoryResult<CommitOutcome> {
        self.with_reservation(key, |slot, stock_key, reservation| {
            let committed = match reservation.commit(ctx.now)? {
                Transition::Applied(committed) => committed,
                Transition::Unchanged => {
                    return Ok(CommitOutcome {
                        reservation,
                        change: None,
                    });
                }
            };

            match policy {
                CommitPolicy::MarkOnly => {
                    self.journal
                        .record_reservation(&committed)
                        .inspect_err(|err| journal_failed(stock_key, "COMMIT", err))?;
                    slot.reservations.insert(key.reference_id.clone(), committed.clone());
                    Ok(CommitOutcome {
                        reservation: committed,
                        change: None,
                    })
                }
                CommitPolicy::Consume => {
                    let consumed = match committed.consume(ctx.now)? {
                        Transition::Applied(consumed) => consumed,
                        Transition::Unchanged => committed,
                    };
                    let change = self.apply_consume(slot, stock_key, consumed.clone(), ctx)?;
                    Ok(CommitOutcome {
                        reservation: consumed,
                        change: Some(change),
                    })
                }
            }
        })
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    fn consume(&self, key: &ReservationKey, ctx: &ChangeContext) -> InventoryResult<Option<StockChange>> {
        self.with_reservation(key, |slot, stock_key, reservation| match reservation.consume(ctx.now)? {
            Transition::Applied(consumed) => self.apply_consume(slot, stock_key, consumed, ctx).map(Some),
            Transition::Unchanged => Ok(None),
        })
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, location = %key.location), err)]
    fn adjust(&self, key: &StockKey, delta: i64, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        let slot = self.existing_slot(key)?;
        let mut guard = lock_slot(&slot)?;

        let before = guard.record(key)?.clone();
        let after = before.adjust(delta, ctx.now)?;
        let change = change(TransactionType::Adjust, before, after.clone(), None, ctx);
        self.journal(&change)?;

        guard.record = Some(after);
        self.notify(&change);
        Ok(change)
    }

    #[instrument(skip(self, key, ctx), fields(product_id = %key.product_id, location = %key.location), err)]
    fn remove(&self, key: &StockKey, ctx: &ChangeContext) -> InventoryResult<StockChange> {
        let slot = self.existing_slot(key)?;
        let mut guard = lock_slot(&slot)?;

        let before = guard.record(key)?.clone();
        let after = before.drain(ctx.now)?;
        let mut ctx = ctx.clone();
        if ctx.reason.is_none() {
            ctx.reason = Some("record removed".to_string());
        }
        let change = change(TransactionType::Adjust, before, after, None, &ctx);
        self.journal
            .record_removal(&change)
            .inspect_err(|err| journal_failed(key, "REMOVE", err))?;

        guard.record = None;
        {
            let mut index = self.lock_index()?;
            for (reference_id, _) in guard.reservations.drain() {
                index.remove(&ReservationKey::new(key.product_id.clone(), reference_id));
            }
        }
        self.notify_removal(&change);
        Ok(change)
    }

    #[instrument(skip(self, ctx), fields(now = %ctx.now))]
    fn expire_due(&self, ctx: &ChangeContext) -> InventoryResult<ExpirySweep> {
        let mut sweep = ExpirySweep::default();

        for (stock_key, slot) in self.all_slots()? {
            let mut guard = lock_slot(&slot)?;

            let mut due: Vec<Reservation> = guard
                .reservations
                .values()
                .filter(|r| r.is_due(ctx.now))
                .cloned()
                .collect();
            due.sort_by_key(|r| (r.created_at(), r.reference_id().clone()));

            for reservation in due {
                match self.expire_one(&guard, &stock_key, &reservation, ctx) {
                    Ok((after, expired, change)) => {
                        guard.record = Some(after);
                        guard.reservations.insert(expired.reference_id().clone(), expired);
                        self.notify(&change);
                        sweep.changes.push(change);
                    }
                    Err(err) => sweep.failures.push((reservation.key().clone(), err)),
                }
            }
        }

        Ok(sweep)
    }

    fn subscribe(&self, observer: Arc<dyn CommitObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Locks usable and the journal's storage reachable.
    fn is_healthy(&self) -> bool {
        self.slots.read().is_ok() && self.index.lock().is_ok() && self.journal.is_healthy()
    }
}

fn lock_slot(slot: &Mutex<KeySlot>) -> InventoryResult<MutexGuard<'_, KeySlot>> {
    slot.lock()
        .map_err(|_| InventoryError::unavailable("ledger key lock poisoned"))
}

fn change(
    transaction_type: TransactionType,
    before: InventoryRecord,
    after: InventoryRecord,
    reservation: Option<Reservation>,
    ctx: &ChangeContext,
) -> StockChange {
    StockChange {
        transaction_type,
        before,
        after,
        reservation,
        reason: ctx.reason.clone(),
        correlation_id: ctx.correlation_id,
        occurred_at: ctx.now,
    }
}

fn journal_failed(key: &StockKey, operation: &str, err: &InventoryError) {
    tracing::error!(
        product_id = %key.product_id,
        location = %key.location,
        operation,
        error = %err,
        "journal write failed; mutation discarded"
    );
}

fn record_not_found(key: &StockKey) -> InventoryError {
    InventoryError::not_found(format!("no inventory record for {key}"))
}

fn reservation_not_found(key: &ReservationKey) -> InventoryError {
    InventoryError::not_found(format!("no reservation {key}"))
}
