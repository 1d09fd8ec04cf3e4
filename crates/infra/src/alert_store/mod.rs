//! Persisted low-stock alerts (open alerts are listed to operators).

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAlertStore;
pub use postgres::PostgresAlertStore;
pub use r#trait::{AlertStore, LowStockAlertRecord};
