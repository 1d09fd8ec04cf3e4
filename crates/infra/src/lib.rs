//! Infrastructure layer: ledger state, transaction log, alert store,
//! event outbox, background sweeper and wiring.

pub mod alert_store;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod ledger;
pub mod outbox;
pub mod sweeper;
pub mod transaction_log;
pub mod transport;

#[cfg(test)]
mod integration_tests;

pub use alert_store::{AlertStore, InMemoryAlertStore, LowStockAlertRecord, PostgresAlertStore};
pub use bootstrap::{InventoryCoordinator, InventoryCore};
pub use config::{ConfigError, InventoryConfig};
pub use coordinator::{ChangeNotifier, CoordinatorSettings, ExpiryReport, ReservationCoordinator};
pub use db::PgHandle;
pub use ledger::{
    Availability, ChangeContext, ChangeJournal, CommitObserver, CommitOutcome, CommitPolicy, InMemoryLedger,
    LedgerSnapshot, PostgresLedgerStore, QuantityLedger, ReserveOutcome, ReserveRequest,
};
pub use outbox::{
    Backoff, DeadLetter, DispatcherConfig, DispatcherHandle, EventOutbox, FlushReport, OutboxConfig, OutboxDispatcher,
    OutboxStats, RetryPolicy,
};
pub use sweeper::{ExpirySweeper, SweepTarget, SweeperConfig, SweeperHandle, SweeperStats};
pub use transaction_log::{InMemoryTransactionLog, PageRequest, PostgresTransactionLog, TransactionLog, TransactionPage};
pub use transport::LoggingTransport;
