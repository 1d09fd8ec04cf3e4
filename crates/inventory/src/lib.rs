//! Inventory domain module.
//!
//! Business rules for stock quantities, reservations and low-stock alerts,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod alert;
pub mod record;
pub mod reservation;
pub mod transaction;

pub use alert::{DEFAULT_LOW_STOCK_THRESHOLD, ThresholdPolicy, evaluate};
pub use record::InventoryRecord;
pub use reservation::{Reservation, ReservationKey, ReservationState, Transition};
pub use transaction::{NewTransaction, StockChange, TransactionRecord};
