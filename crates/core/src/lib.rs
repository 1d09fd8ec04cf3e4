//! `censudx-core`: building blocks shared by the inventory crates.
//!
//! Identifiers, operation kinds and the error taxonomy only; no IO.

pub mod error;
pub mod id;
pub mod movement;

pub use error::{InventoryError, InventoryResult};
pub use id::{CorrelationId, InventoryRecordId, Location, ProductId, ReferenceId, StockKey};
pub use movement::TransactionType;
