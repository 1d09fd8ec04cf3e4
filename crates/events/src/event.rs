use censudx_core::ProductId;

use crate::bus::Queue;

/// A domain event handed to downstream consumers.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **routed** to exactly one queue
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "low_stock_alert").
    fn event_type(&self) -> &'static str;

    /// Queue the event is published to.
    fn queue(&self) -> Queue;

    /// Product the event belongs to; sequence numbers are allocated per product.
    fn product_id(&self) -> &ProductId;
}
