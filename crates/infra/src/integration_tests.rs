//! Integration tests for the full reservation pipeline.
//!
//! Tests: Request → Ledger → TransactionLog → AlertStore → Outbox → Transport
//!
//! Verifies:
//! - Successful mutations leave a log entry and an update event
//! - Failed mutations leave no trace anywhere
//! - Messaging outages never fail a committed mutation
//! - Concurrent reservations never oversell
//! - Events for one key are sequenced in commit order

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    use censudx_core::{InventoryError, Location, ProductId, ReferenceId, StockKey, TransactionType};
    use censudx_events::{DomainEvent, Queue, RecordingTransport, Severity};
    use censudx_inventory::{ReservationKey, ReservationState};

    use crate::alert_store::InMemoryAlertStore;
    use crate::coordinator::{CoordinatorSettings, ReservationCoordinator};
    use crate::ledger::{ChangeJournal, CommitPolicy, InMemoryLedger, ReserveRequest};
    use crate::outbox::{EventOutbox, OutboxConfig, RetryPolicy};
    use crate::transaction_log::{InMemoryTransactionLog, PageRequest};

    type TestCoordinator =
        ReservationCoordinator<Arc<InMemoryLedger>, Arc<InMemoryTransactionLog>, Arc<InMemoryAlertStore>>;

    struct Harness {
        coordinator: TestCoordinator,
        log: Arc<InMemoryTransactionLog>,
        alerts: Arc<InMemoryAlertStore>,
        transport: Arc<RecordingTransport>,
    }

    impl Harness {
        /// Flush the outbox, then hand out what reached the transport.
        fn delivered(&self) -> &RecordingTransport {
            self.coordinator.flush_events();
            &self.transport
        }
    }

    fn setup() -> Harness {
        setup_with(CoordinatorSettings::default())
    }

    fn setup_with(settings: CoordinatorSettings) -> Harness {
        let log = Arc::new(InMemoryTransactionLog::new());
        let alerts = Arc::new(InMemoryAlertStore::new());
        let transport = Arc::new(RecordingTransport::new());

        let journal: Arc<dyn ChangeJournal> = log.clone();
        let ledger = Arc::new(InMemoryLedger::new(journal));
        let outbox = Arc::new(EventOutbox::new(
            transport.clone(),
            OutboxConfig {
                capacity: 4096,
                retry: RetryPolicy::fixed(5, Duration::ZERO),
            },
        ));

        Harness {
            coordinator: ReservationCoordinator::new(ledger, log.clone(), alerts.clone(), outbox, settings),
            log,
            alerts,
            transport,
        }
    }

    fn product() -> ProductId {
        ProductId::parse("product_123").unwrap()
    }

    fn location() -> Location {
        Location::parse("warehouse_a").unwrap()
    }

    fn key() -> StockKey {
        StockKey::new(product(), location())
    }

    fn request(reference: &str, quantity: i64) -> ReserveRequest {
        ReserveRequest::new(product(), location(), quantity, ReferenceId::parse(reference).unwrap())
    }

    fn rkey(reference: &str) -> ReservationKey {
        ReservationKey::new(product(), ReferenceId::parse(reference).unwrap())
    }

    fn logged_types(log: &InMemoryTransactionLog) -> Vec<TransactionType> {
        log.entries().iter().map(|t| t.transaction_type).collect()
    }

    fn update_changes(transport: &RecordingTransport) -> Vec<(TransactionType, i64, i64)> {
        transport
            .sent_to(Queue::InventoryUpdates)
            .into_iter()
            .filter_map(|m| match m.envelope.into_payload() {
                DomainEvent::InventoryUpdate(u) => Some((u.transaction_type, u.old_quantity, u.new_quantity)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn reserve_release_and_repeat_release() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();

        let reservation = h.coordinator.reserve(request("order_456", 10)).unwrap();
        assert_eq!(reservation.state(), ReservationState::Pending);
        let record = h.coordinator.get(&key()).unwrap();
        assert_eq!(record.available_quantity(), 90);
        assert_eq!(record.reserved_quantity(), 10);

        let released = h.coordinator.release(&rkey("order_456")).unwrap();
        assert_eq!(released.state(), ReservationState::Released);
        assert_eq!(h.coordinator.get(&key()).unwrap().available_quantity(), 100);

        // Second release changes nothing and emits nothing.
        let again = h.coordinator.release(&rkey("order_456")).unwrap();
        assert_eq!(again.state(), ReservationState::Released);

        assert_eq!(
            logged_types(&h.log),
            vec![TransactionType::In, TransactionType::Reserve, TransactionType::Release]
        );
        assert_eq!(
            update_changes(h.delivered()),
            vec![
                (TransactionType::In, 0, 100),
                (TransactionType::Reserve, 100, 90),
                (TransactionType::Release, 90, 100),
            ]
        );

        let sequences: Vec<u64> = h
            .delivered()
            .sent()
            .iter()
            .map(|m| m.envelope.sequence_number())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn reserving_the_last_units_raises_a_critical_alert() {
        let h = setup();
        h.coordinator.receive(&key(), 10, None).unwrap();
        h.coordinator.reserve(request("order_1", 10)).unwrap();

        let open = h.coordinator.low_stock_alerts().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].alert.severity, Severity::Critical);
        assert_eq!(open[0].alert.current_quantity, 0);
        assert_eq!(open[0].alert.threshold, 10);

        let severities: Vec<Severity> = h
            .delivered()
            .sent_to(Queue::LowStockAlerts)
            .into_iter()
            .filter_map(|m| match m.envelope.into_payload() {
                DomainEvent::LowStockAlert(alert) => Some(alert.severity),
                _ => None,
            })
            .collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Critical]);
    }

    #[test]
    fn check_stock_publishes_validation_without_mutating() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator.reserve(request("order_1", 5)).unwrap();
        let logged = h.log.len();

        let availability = h
            .coordinator
            .check_stock(&key(), 25, Some("order_789".to_string()))
            .unwrap();
        assert!(availability.available);
        assert_eq!(availability.current_stock, 100);
        assert_eq!(availability.available_stock, 95);

        assert!(!h.coordinator.check_stock(&key(), 150, None).unwrap().available);

        let validations = h.delivered().sent_to(Queue::StockValidation);
        assert_eq!(validations.len(), 2);
        match validations[0].envelope.payload() {
            DomainEvent::StockValidation(v) => {
                assert!(v.validation_result);
                assert_eq!(v.available_quantity, 95);
                assert_eq!(v.order_id.as_deref(), Some("order_789"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.log.len(), logged);
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 5);
    }

    #[test]
    fn insufficient_stock_leaves_no_trace() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();

        let err = h.coordinator.reserve(request("order_big", 150)).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                requested: 150,
                available: 100
            }
        );

        assert!(matches!(
            h.coordinator.reservation(&rkey("order_big")),
            Err(InventoryError::NotFound(_))
        ));
        assert_eq!(logged_types(&h.log), vec![TransactionType::In]);
        assert_eq!(h.delivered().sent().len(), 1);
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 0);
    }

    #[test]
    fn log_outage_fails_the_call_and_publishes_nothing() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();

        h.log.set_available(false);
        let err = h.coordinator.reserve(request("order_1", 10)).unwrap_err();
        assert!(err.is_retryable());
        assert!(!h.coordinator.is_healthy());
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 0);
        assert_eq!(h.delivered().sent().len(), 1);

        h.log.set_available(true);
        assert!(h.coordinator.is_healthy());
        h.coordinator.reserve(request("order_1", 10)).unwrap();
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 10);
    }

    #[test]
    fn broker_outage_buffers_and_flush_delivers_in_order() {
        let h = setup();
        h.transport.set_available(false);

        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator.reserve(request("order_1", 10)).unwrap();
        h.coordinator.release(&rkey("order_1")).unwrap();

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.coordinator.outbox_stats().buffered, 3);
        assert_eq!(h.log.len(), 3);
        assert!(h.coordinator.is_healthy());

        h.transport.set_available(true);
        let report = h.coordinator.flush_events();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.remaining, 0);

        let delivered: Vec<u64> = h
            .transport
            .sent()
            .iter()
            .map(|m| m.envelope.sequence_number())
            .collect();
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[test]
    fn expired_reservation_is_released_exactly_once() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator
            .reserve(request("order_ttl", 20).with_ttl(Some(chrono::Duration::minutes(15))))
            .unwrap();

        let later = Utc::now() + chrono::Duration::minutes(16);
        assert_eq!(h.coordinator.expire_reservations(later).unwrap().expired, 1);
        assert_eq!(h.coordinator.expire_reservations(later).unwrap().expired, 0);

        let reservation = h.coordinator.reservation(&rkey("order_ttl")).unwrap();
        assert_eq!(reservation.state(), ReservationState::Expired);
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 0);
        assert_eq!(
            logged_types(&h.log),
            vec![TransactionType::In, TransactionType::Reserve, TransactionType::Release]
        );

        assert!(matches!(
            h.coordinator.release(&rkey("order_ttl")),
            Err(InventoryError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn default_ttl_applies_when_request_has_none() {
        let h = setup_with(CoordinatorSettings {
            default_reservation_ttl: Some(chrono::Duration::minutes(5)),
            ..CoordinatorSettings::default()
        });
        h.coordinator.receive(&key(), 100, None).unwrap();

        let reservation = h.coordinator.reserve(request("order_1", 10)).unwrap();
        assert!(reservation.expires_at().is_some());
    }

    #[test]
    fn commit_ships_stock_and_publishes_out() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator.reserve(request("order_1", 10)).unwrap();

        let committed = h.coordinator.commit(&rkey("order_1")).unwrap();
        assert_eq!(committed.state(), ReservationState::Committed);

        let record = h.coordinator.get(&key()).unwrap();
        assert_eq!(record.total_quantity(), 90);
        assert_eq!(record.reserved_quantity(), 0);
        assert_eq!(record.available_quantity(), 90);

        assert_eq!(logged_types(&h.log).last(), Some(&TransactionType::Out));
        assert_eq!(update_changes(h.delivered()).last(), Some(&(TransactionType::Out, 90, 90)));

        // Committing twice is a no-op.
        h.coordinator.commit(&rkey("order_1")).unwrap();
        assert_eq!(h.log.len(), 3);
    }

    #[test]
    fn mark_only_commit_waits_for_consume() {
        let h = setup_with(CoordinatorSettings {
            commit_policy: CommitPolicy::MarkOnly,
            ..CoordinatorSettings::default()
        });
        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator.reserve(request("order_1", 10)).unwrap();

        h.coordinator.commit(&rkey("order_1")).unwrap();
        assert_eq!(h.coordinator.get(&key()).unwrap().reserved_quantity(), 10);
        assert_eq!(h.log.len(), 2);

        let consumed = h.coordinator.consume(&rkey("order_1")).unwrap();
        assert!(consumed.consumed_at().is_some());
        let record = h.coordinator.get(&key()).unwrap();
        assert_eq!(record.total_quantity(), 90);
        assert_eq!(record.reserved_quantity(), 0);
        assert_eq!(logged_types(&h.log).last(), Some(&TransactionType::Out));
    }

    #[test]
    fn concurrent_reserves_on_one_key_never_oversell() {
        let h = setup();
        h.coordinator.receive(&key(), 50, None).unwrap();
        let successes = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for i in 0..10 {
                let coordinator = &h.coordinator;
                let successes = &successes;
                s.spawn(move || {
                    if coordinator.reserve(request(&format!("order_{i}"), 10)).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 5);
        let record = h.coordinator.get(&key()).unwrap();
        assert_eq!(record.reserved_quantity(), 50);
        assert_eq!(record.available_quantity(), 0);
        assert_eq!(h.log.len(), 6);
    }

    #[test]
    fn transaction_history_pages_newest_first() {
        let h = setup();
        for qty in 1..=5 {
            h.coordinator.receive(&key(), qty, None).unwrap();
        }

        let first_request = PageRequest::new(Some(2), None);
        let first = h.coordinator.transactions(&product(), &location(), first_request).unwrap();
        let seqs: Vec<u64> = first.transactions.iter().map(|t| t.sequence_number).collect();
        assert_eq!(seqs, vec![5, 4]);

        let second_request = first_request.after(&first).unwrap();
        let second = h.coordinator.transactions(&product(), &location(), second_request).unwrap();
        let seqs: Vec<u64> = second.transactions.iter().map(|t| t.sequence_number).collect();
        assert_eq!(seqs, vec![3, 2]);

        let third = h
            .coordinator
            .transactions(&product(), &location(), second_request.after(&second).unwrap())
            .unwrap();
        assert_eq!(third.transactions.len(), 1);
        assert_eq!(third.next_before, None);
    }

    #[test]
    fn restocking_resolves_the_open_alert() {
        let h = setup();
        h.coordinator.receive(&key(), 8, None).unwrap();
        assert_eq!(h.coordinator.low_stock_alerts().unwrap().len(), 1);

        h.coordinator
            .receive(&key(), 50, Some("supplier delivery".to_string()))
            .unwrap();

        assert!(h.coordinator.low_stock_alerts().unwrap().is_empty());
        let all = h.alerts.all();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_resolved());
        assert_eq!(h.log.entries()[1].reason.as_deref(), Some("supplier delivery"));
    }

    #[test]
    fn remove_drains_record_and_resolves_alert() {
        let h = setup();
        h.coordinator.receive(&key(), 5, None).unwrap();
        assert_eq!(h.coordinator.low_stock_alerts().unwrap().len(), 1);

        h.coordinator.remove(&key()).unwrap();

        assert!(h.coordinator.low_stock_alerts().unwrap().is_empty());
        assert!(matches!(h.coordinator.get(&key()), Err(InventoryError::NotFound(_))));
        assert_eq!(logged_types(&h.log), vec![TransactionType::In, TransactionType::Adjust]);
        assert_eq!(update_changes(h.delivered()).last(), Some(&(TransactionType::Adjust, 5, 0)));
    }

    #[test]
    fn remove_refuses_records_with_reserved_stock() {
        let h = setup();
        h.coordinator.receive(&key(), 100, None).unwrap();
        h.coordinator.reserve(request("order_1", 10)).unwrap();

        assert!(h.coordinator.remove(&key()).is_err());
        assert_eq!(h.coordinator.get(&key()).unwrap().total_quantity(), 100);
    }

    #[test]
    fn history_spans_removal_and_reintake() {
        let h = setup();
        h.coordinator.receive(&key(), 5, None).unwrap();
        h.coordinator.remove(&key()).unwrap();
        h.coordinator.receive(&key(), 7, None).unwrap();

        let page = h
            .coordinator
            .transactions(&product(), &location(), PageRequest::default())
            .unwrap();
        let types: Vec<TransactionType> = page.transactions.iter().map(|t| t.transaction_type).collect();
        assert_eq!(types, vec![TransactionType::In, TransactionType::Adjust, TransactionType::In]);

        let current = h.coordinator.get(&key()).unwrap().id_typed();
        assert_eq!(page.transactions[0].inventory_record_id, current);
        assert_ne!(page.transactions[2].inventory_record_id, current);
    }

    #[test]
    fn concurrent_changes_publish_a_consistent_event_chain() {
        let h = setup();
        h.coordinator.receive(&key(), 40, None).unwrap();

        std::thread::scope(|s| {
            for t in 0..6 {
                let coordinator = &h.coordinator;
                s.spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..25 {
                        let reference = format!("order_{t}_{i}");
                        if coordinator.reserve(request(&reference, 3)).is_ok() {
                            if i % 2 == 0 {
                                coordinator.release(&rkey(&reference)).unwrap();
                            } else {
                                held.push(reference);
                            }
                        }
                        let delta = if (t + i) % 2 == 0 { 2 } else { -2 };
                        let _ = coordinator.adjust(&key(), delta, None);
                    }
                    for reference in held {
                        coordinator.release(&rkey(&reference)).unwrap();
                    }
                });
            }
        });
        h.coordinator.adjust(&key(), 100, None).unwrap();

        let mut events: Vec<(u64, DomainEvent)> = h
            .delivered()
            .sent()
            .into_iter()
            .map(|m| (m.envelope.sequence_number(), m.envelope.into_payload()))
            .collect();
        events.sort_by_key(|(sequence, _)| *sequence);

        let mut previous: Option<i64> = None;
        for (sequence, event) in &events {
            match event {
                DomainEvent::InventoryUpdate(update) => {
                    if let Some(previous) = previous {
                        assert_eq!(update.old_quantity, previous, "update {sequence} skips a change");
                    }
                    previous = Some(update.new_quantity);
                }
                // An alert always reports the update sequenced right before it.
                DomainEvent::LowStockAlert(alert) => {
                    assert_eq!(Some(alert.current_quantity), previous, "alert {sequence} is stale");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        let record = h.coordinator.get(&key()).unwrap();
        assert_eq!(record.reserved_quantity(), 0);
        assert_eq!(previous, Some(record.available_quantity()));
        assert!(h.coordinator.low_stock_alerts().unwrap().is_empty());
    }
}
