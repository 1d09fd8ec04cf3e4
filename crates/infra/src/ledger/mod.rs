//! Quantity ledger: the authoritative per-(product, location) stock state.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{
    Availability, ChangeContext, ChangeJournal, CommitObserver, CommitOutcome, CommitPolicy, ExpirySweep,
    LedgerSnapshot, QuantityLedger, ReserveOutcome, ReserveRequest,
};
