//! Inventory error model.

use thiserror::Error;

/// Result type used across the inventory core.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Error kinds surfaced by the inventory core.
///
/// Ledger and transaction log failures propagate to the caller unchanged.
/// Messaging failures never reach this type; they stop at the outbox.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Malformed input (non-positive quantity, empty identifier). Rejected
    /// before any mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown product/location or reservation.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request exceeds the quantity currently available for reservation.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// The reservation already left the pending state.
    #[error("reservation already {state}")]
    AlreadyTerminal { state: String },

    /// The mutation would break a record invariant (e.g. reserved > total).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage or transport could not be reached. Retryable with backoff.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl InventoryError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn already_terminal(state: impl core::fmt::Display) -> Self {
        Self::AlreadyTerminal {
            state: state.to_string(),
        }
    }

    /// Only `Unavailable` is worth retrying; every other kind is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Stable machine-readable code for the request layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::InvalidState(_) => "invalid_state",
            Self::Unavailable(_) => "unavailable",
        }
    }
}
