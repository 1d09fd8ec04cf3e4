//! Wiring: builds a coordinator from [`InventoryConfig`].
//!
//! `USE_PERSISTENT_STORES=false` (the default) wires in-memory stores for
//! dev/test. With `true`, ledger state, the transaction log and the alert
//! store live in Postgres, and the ledger is restored from it on start.
//! Events go to Redis Streams when `REDIS_URL` is set and the `redis`
//! feature is enabled; otherwise they are only logged.

use std::sync::Arc;

use anyhow::Context;

use censudx_events::Transport;

use crate::alert_store::{AlertStore, InMemoryAlertStore, PostgresAlertStore};
use crate::config::InventoryConfig;
use crate::coordinator::ReservationCoordinator;
use crate::db::PgHandle;
use crate::ledger::{ChangeJournal, InMemoryLedger, PostgresLedgerStore};
use crate::outbox::{DispatcherConfig, DispatcherHandle, EventOutbox, OutboxDispatcher};
use crate::sweeper::{ExpirySweeper, SweeperHandle};
use crate::transaction_log::{InMemoryTransactionLog, PostgresTransactionLog, TransactionLog};
use crate::transport::LoggingTransport;

/// Postgres pool size for the persistent stores.
const PG_MAX_CONNECTIONS: u32 = 10;

pub type InventoryCoordinator =
    ReservationCoordinator<Arc<InMemoryLedger>, Arc<dyn TransactionLog>, Arc<dyn AlertStore>>;

/// A running inventory core: the coordinator plus its background threads.
pub struct InventoryCore {
    pub coordinator: Arc<InventoryCoordinator>,
    sweeper: Option<SweeperHandle>,
    dispatcher: Option<DispatcherHandle>,
}

impl InventoryCore {
    pub fn sweeper(&self) -> Option<&SweeperHandle> {
        self.sweeper.as_ref()
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Stop the sweeper, then the dispatcher, and flush whatever the outbox
    /// can still deliver.
    pub fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        let report = self.coordinator.flush_events();
        tracing::info!(
            delivered = report.delivered,
            remaining = report.remaining,
            "inventory core stopped"
        );
    }
}

/// Build the coordinator and start the outbox dispatcher and expiry sweeper.
pub fn start(config: &InventoryConfig) -> anyhow::Result<InventoryCore> {
    let transport = build_transport(config)?;
    let coordinator = Arc::new(build(config, transport)?);

    let dispatcher = OutboxDispatcher::spawn(coordinator.outbox().clone(), DispatcherConfig::default())
        .context("failed to spawn outbox dispatcher")?;
    let sweeper = ExpirySweeper::spawn(coordinator.clone(), config.sweeper_config())
        .context("failed to spawn expiry sweeper")?;

    Ok(InventoryCore {
        coordinator,
        sweeper: Some(sweeper),
        dispatcher: Some(dispatcher),
    })
}

/// Build a coordinator publishing to `transport`.
pub fn build(config: &InventoryConfig, transport: Arc<dyn Transport>) -> anyhow::Result<InventoryCoordinator> {
    config.validate().context("invalid inventory configuration")?;

    let (ledger, log, alerts): (InMemoryLedger, Arc<dyn TransactionLog>, Arc<dyn AlertStore>) =
        if config.use_persistent_stores {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
            let db = PgHandle::connect(database_url, PG_MAX_CONNECTIONS).context("failed to connect to Postgres")?;
            let store = PostgresLedgerStore::new(db.clone());
            let snapshot = store.load().context("failed to load ledger state")?;
            let ledger = InMemoryLedger::restore(Arc::new(store), snapshot)
                .context("persisted ledger state is inconsistent")?;
            tracing::info!("using Postgres ledger state, transaction log and alert store");
            (
                ledger,
                Arc::new(PostgresTransactionLog::new(db.clone())),
                Arc::new(PostgresAlertStore::new(db)),
            )
        } else {
            tracing::info!("using in-memory ledger, transaction log and alert store");
            let log: Arc<dyn TransactionLog> = Arc::new(InMemoryTransactionLog::new());
            let journal: Arc<dyn ChangeJournal> = Arc::new(log.clone());
            (InMemoryLedger::new(journal), log, Arc::new(InMemoryAlertStore::new()))
        };

    let ledger = Arc::new(ledger);
    let outbox = Arc::new(EventOutbox::new(transport, config.outbox_config()));

    Ok(ReservationCoordinator::new(
        ledger,
        log,
        alerts,
        outbox,
        config.coordinator_settings(),
    ))
}

fn build_transport(config: &InventoryConfig) -> anyhow::Result<Arc<dyn Transport>> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(redis_url) => {
            let transport = crate::transport::RedisStreamsTransport::new(redis_url, None)
                .context("failed to create Redis Streams transport")?;
            tracing::info!("publishing events to Redis Streams");
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL set but redis feature not enabled, events are only logged");
            Ok(Arc::new(LoggingTransport))
        }
        None => {
            tracing::warn!("no message broker configured; events are only logged");
            Ok(Arc::new(LoggingTransport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use censudx_core::StockKey;
    use censudx_events::RecordingTransport;
    use std::time::{Duration, Instant};

    #[test]
    fn in_memory_wiring_serves_requests() {
        let transport = Arc::new(RecordingTransport::new());
        let coordinator = build(&InventoryConfig::default(), transport.clone()).unwrap();
        let key = StockKey::parse("product_123", "warehouse_a").unwrap();

        coordinator.receive(&key, 100, None).unwrap();
        coordinator.flush_events();

        assert!(coordinator.is_healthy());
        assert_eq!(coordinator.get(&key).unwrap().total_quantity(), 100);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn without_a_broker_events_are_delivered_to_the_log() {
        let transport = build_transport(&InventoryConfig::default()).unwrap();
        assert!(transport.is_connected());

        let coordinator = build(&InventoryConfig::default(), transport).unwrap();
        let key = StockKey::parse("product_123", "warehouse_a").unwrap();
        for _ in 0..20 {
            coordinator.receive(&key, 50, None).unwrap();
        }

        assert_eq!(coordinator.flush_events().delivered, 20);
        assert_eq!(coordinator.outbox_stats().buffered, 0);
        assert_eq!(coordinator.outbox_stats().dead_lettered, 0);
    }

    #[test]
    fn start_spawns_background_threads_and_shuts_down() {
        let config = InventoryConfig {
            sweep_interval_ms: 10,
            ..InventoryConfig::default()
        };
        let core = start(&config).unwrap();
        assert!(core.sweeper().is_some());
        assert!(core.is_dispatching());

        let key = StockKey::parse("product_123", "warehouse_a").unwrap();
        core.coordinator.receive(&key, 50, None).unwrap();

        // The dispatcher drains the outbox without anyone flushing.
        let deadline = Instant::now() + Duration::from_secs(5);
        while core.coordinator.outbox_stats().published == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(core.coordinator.outbox_stats().published, 1);
        core.shutdown();
    }

    #[test]
    fn persistent_mode_without_database_url_is_rejected() {
        let config = InventoryConfig {
            use_persistent_stores: true,
            ..InventoryConfig::default()
        };
        assert!(build(&config, Arc::new(RecordingTransport::new())).is_err());
    }
}
