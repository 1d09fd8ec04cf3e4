//! Domain events and the outbound transport boundary.

pub mod bus;
pub mod domain;
pub mod envelope;
pub mod event;
pub mod recording;

pub use bus::{Queue, Transport, TransportError};
pub use domain::{DomainEvent, InventoryUpdate, LowStockAlert, Severity, StockValidation};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use recording::{RecordingTransport, SentMessage};
