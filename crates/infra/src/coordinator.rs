//! Reservation coordinator (application-level orchestration).
//!
//! Every mutating call runs the same pipeline:
//!
//! ```text
//! request
//!   ↓
//! 1. Ledger mutation (per-key exclusive section; fails fast)
//!   ↓
//! 2. Transaction log append (journaled inside that section)
//!   ↓
//! 3. Low-stock evaluation on the post-mutation record; alert store upsert/resolve
//!   ↓
//! 4. Publish InventoryUpdate and, when triggered, LowStockAlert (best-effort)
//! ```
//!
//! Steps 3 and 4 run in [`ChangeNotifier`], a [`CommitObserver`] the ledger
//! calls while the key is still locked. Events and alert writes for one key
//! therefore follow commit order even under concurrent callers.
//!
//! Ledger and log errors propagate unchanged and nothing downstream runs.
//! Once the ledger has committed, nothing after step 2 can fail the call:
//! alert store errors are logged, and publishing never fails (the outbox
//! buffers, retries and dead-letters on its own).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument};

use censudx_core::{InventoryError, InventoryResult, Location, ProductId, StockKey};
use censudx_events::StockValidation;
use censudx_inventory::{InventoryRecord, Reservation, ReservationKey, StockChange, ThresholdPolicy};

use crate::alert_store::{AlertStore, LowStockAlertRecord};
use crate::ledger::{Availability, ChangeContext, CommitObserver, CommitPolicy, QuantityLedger, ReserveRequest};
use crate::outbox::{EventOutbox, FlushReport, OutboxStats};
use crate::transaction_log::{PageRequest, TransactionLog, TransactionPage};

/// Behavioural knobs the coordinator applies on top of the ledger.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub thresholds: ThresholdPolicy,
    pub commit_policy: CommitPolicy,
    /// TTL for reservations that don't specify one; `None` never expires.
    pub default_reservation_ttl: Option<Duration>,
}

/// Summary of one expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub expired: usize,
    pub failed: usize,
}

/// Alert evaluation and event publishing for committed changes.
pub struct ChangeNotifier<A> {
    alerts: A,
    outbox: Arc<EventOutbox>,
    thresholds: ThresholdPolicy,
}

impl<A: AlertStore> ChangeNotifier<A> {
    pub fn new(alerts: A, outbox: Arc<EventOutbox>, thresholds: ThresholdPolicy) -> Self {
        Self {
            alerts,
            outbox,
            thresholds,
        }
    }

    fn resolve_alert(&self, record: &InventoryRecord, now: DateTime<Utc>) {
        match self.alerts.resolve(record.id_typed(), now) {
            Ok(Some(_)) => info!(
                product_id = %record.product_id(),
                location = %record.location(),
                "low-stock alert resolved"
            ),
            Ok(None) => {}
            Err(err) => error!(
                product_id = %record.product_id(),
                location = %record.location(),
                error = %err,
                "failed to resolve low-stock alert"
            ),
        }
    }
}

impl<A: AlertStore> CommitObserver for ChangeNotifier<A> {
    fn on_commit(&self, change: &StockChange) {
        self.outbox.publish(change.to_update_event(), change.occurred_at);

        if !change.available_changed() {
            return;
        }

        match self.thresholds.evaluate(&change.after) {
            Some(alert) => {
                if let Err(err) = self.alerts.upsert(&alert, change.occurred_at) {
                    error!(
                        product_id = %alert.product_id,
                        location = %alert.location,
                        error = %err,
                        "failed to persist low-stock alert"
                    );
                }
                self.outbox.publish(alert, change.occurred_at);
            }
            None => self.resolve_alert(&change.after, change.occurred_at),
        }
    }

    fn on_remove(&self, change: &StockChange) {
        self.outbox.publish(change.to_update_event(), change.occurred_at);
        self.resolve_alert(&change.after, change.occurred_at);
    }
}

pub struct ReservationCoordinator<L, T, A> {
    ledger: L,
    log: T,
    notifier: Arc<ChangeNotifier<A>>,
    outbox: Arc<EventOutbox>,
    settings: CoordinatorSettings,
}

impl<L, T, A> ReservationCoordinator<L, T, A>
where
    L: QuantityLedger,
    T: TransactionLog,
    A: AlertStore + 'static,
{
    /// Wire the pipeline and subscribe the notifier to `ledger`.
    pub fn new(ledger: L, log: T, alerts: A, outbox: Arc<EventOutbox>, settings: CoordinatorSettings) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(alerts, outbox.clone(), settings.thresholds.clone()));
        ledger.subscribe(notifier.clone());
        Self {
            ledger,
            log,
            notifier,
            outbox,
            settings,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn outbox(&self) -> &Arc<EventOutbox> {
        &self.outbox
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Read-only availability check that also publishes a `StockValidation`
    /// so order processing can audit the decision.
    #[instrument(skip(self, key, order_id), fields(product_id = %key.product_id, location = %key.location), err)]
    pub fn check_stock(
        &self,
        key: &StockKey,
        requested_quantity: i64,
        order_id: Option<String>,
    ) -> InventoryResult<Availability> {
        let availability = self.ledger.check_availability(key, requested_quantity)?;

        self.outbox.publish(
            StockValidation {
                product_id: key.product_id.clone(),
                location: key.location.clone(),
                requested_quantity,
                available_quantity: availability.available_stock,
                order_id,
                validation_result: availability.available,
            },
            Utc::now(),
        );

        Ok(availability)
    }

    #[instrument(skip(self, key, reason), fields(product_id = %key.product_id, location = %key.location), err)]
    pub fn receive(&self, key: &StockKey, quantity: i64, reason: Option<String>) -> InventoryResult<InventoryRecord> {
        let change = self.ledger.receive(key, quantity, &context(reason))?;
        Ok(change.after)
    }

    #[instrument(
        skip(self, request),
        fields(
            product_id = %request.product_id,
            location = %request.location,
            reference_id = %request.reference_id
        ),
        err
    )]
    pub fn reserve(&self, mut request: ReserveRequest) -> InventoryResult<Reservation> {
        if request.ttl.is_none() {
            request.ttl = self.settings.default_reservation_ttl;
        }

        let outcome = self.ledger.reserve(request, &ChangeContext::new())?;
        match outcome.reservation() {
            Some(reservation) => Ok(reservation.clone()),
            None => Err(InventoryError::invalid_state(
                "reserve completed without a reservation",
            )),
        }
    }

    /// Release a pending reservation. Repeating a release is a no-op.
    #[instrument(skip(self, key), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    pub fn release(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        match self.ledger.release(key, &ChangeContext::new())? {
            Some(change) => self.finish_reservation_change(key, change),
            None => self.ledger.reservation(key),
        }
    }

    /// Commit a pending reservation under the configured [`CommitPolicy`].
    #[instrument(skip(self, key), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    pub fn commit(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        let outcome = self
            .ledger
            .commit(key, self.settings.commit_policy, &ChangeContext::new())?;
        Ok(outcome.reservation)
    }

    /// Ship the stock of a reservation committed under `MarkOnly`.
    #[instrument(skip(self, key), fields(product_id = %key.product_id, reference_id = %key.reference_id), err)]
    pub fn consume(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        match self.ledger.consume(key, &ChangeContext::new())? {
            Some(change) => self.finish_reservation_change(key, change),
            None => self.ledger.reservation(key),
        }
    }

    #[instrument(skip(self, key, reason), fields(product_id = %key.product_id, location = %key.location), err)]
    pub fn adjust(&self, key: &StockKey, delta: i64, reason: Option<String>) -> InventoryResult<InventoryRecord> {
        let change = self.ledger.adjust(key, delta, &context(reason))?;
        Ok(change.after)
    }

    /// Delete a record with nothing reserved. Its open alert is resolved.
    #[instrument(skip(self, key), fields(product_id = %key.product_id, location = %key.location), err)]
    pub fn remove(&self, key: &StockKey) -> InventoryResult<()> {
        self.ledger.remove(key, &ChangeContext::new())?;
        info!(product_id = %key.product_id, location = %key.location, "inventory record removed");
        Ok(())
    }

    pub fn get(&self, key: &StockKey) -> InventoryResult<InventoryRecord> {
        self.ledger.get(key)
    }

    pub fn list(&self) -> InventoryResult<Vec<InventoryRecord>> {
        self.ledger.list()
    }

    pub fn reservation(&self, key: &ReservationKey) -> InventoryResult<Reservation> {
        self.ledger.reservation(key)
    }

    /// Transaction history of a (product, location), newest first.
    ///
    /// Spans every record that ever lived there, so history survives removal
    /// and re-intake.
    pub fn transactions(
        &self,
        product_id: &ProductId,
        location: &Location,
        page: PageRequest,
    ) -> InventoryResult<TransactionPage> {
        self.log
            .query_key(&StockKey::new(product_id.clone(), location.clone()), page)
    }

    pub fn low_stock_alerts(&self) -> InventoryResult<Vec<LowStockAlertRecord>> {
        self.notifier.alerts.unresolved()
    }

    /// Expire every pending reservation whose TTL has passed at `now`.
    #[instrument(skip(self))]
    pub fn expire_reservations(&self, now: DateTime<Utc>) -> InventoryResult<ExpiryReport> {
        let sweep = self.ledger.expire_due(&ChangeContext::new().at(now))?;

        for (key, err) in &sweep.failures {
            error!(
                product_id = %key.product_id,
                reference_id = %key.reference_id,
                error = %err,
                "reservation expiry failed; will retry on next sweep"
            );
        }
        if sweep.expired() > 0 {
            info!(expired = sweep.expired(), "expired reservations released");
        }

        Ok(ExpiryReport {
            expired: sweep.expired(),
            failed: sweep.failures.len(),
        })
    }

    pub fn flush_events(&self) -> FlushReport {
        self.outbox.flush()
    }

    pub fn outbox_stats(&self) -> OutboxStats {
        self.outbox.stats()
    }

    /// Unhealthy only when ledger state or its transaction log is
    /// unreachable; messaging never affects health.
    pub fn is_healthy(&self) -> bool {
        self.ledger.is_healthy() && self.log.is_healthy()
    }

    fn finish_reservation_change(&self, key: &ReservationKey, change: StockChange) -> InventoryResult<Reservation> {
        match change.reservation {
            Some(reservation) => Ok(reservation),
            None => self.ledger.reservation(key),
        }
    }
}

fn context(reason: Option<String>) -> ChangeContext {
    match reason {
        Some(reason) => ChangeContext::new().with_reason(reason),
        None => ChangeContext::new(),
    }
}
