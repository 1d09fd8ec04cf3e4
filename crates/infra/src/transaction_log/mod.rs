//! Append-only transaction log (the audit trail of every quantity change).

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryTransactionLog;
pub use postgres::PostgresTransactionLog;
pub use r#trait::{PageRequest, TransactionLog, TransactionPage};
