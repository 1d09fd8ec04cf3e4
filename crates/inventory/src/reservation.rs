//! Reservation lifecycle.
//!
//! ```text
//! Pending --release--> Released
//! Pending --commit---> Committed
//! Pending --ttl------> Expired   (treated as an implicit release)
//! ```
//!
//! Nothing leaves a terminal state. Repeating the transition that produced
//! the current terminal state (release after release, commit after commit)
//! is a no-op; any other transition out of a terminal state is rejected.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use censudx_core::{InventoryError, InventoryResult, Location, ProductId, ReferenceId, StockKey};

use crate::record::ensure_positive;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Committed,
    Released,
    Expired,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Pending => "pending",
            ReservationState::Committed => "committed",
            ReservationState::Released => "released",
            ReservationState::Expired => "expired",
        }
    }
}

impl core::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ReservationState {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationState::Pending),
            "committed" => Ok(ReservationState::Committed),
            "released" => Ok(ReservationState::Released),
            "expired" => Ok(ReservationState::Expired),
            other => Err(InventoryError::invalid_argument(format!(
                "unknown reservation state: {other}"
            ))),
        }
    }
}

/// Identity of a reservation: a reference id is unique per product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationKey {
    pub product_id: ProductId,
    pub reference_id: ReferenceId,
}

impl ReservationKey {
    pub fn new(product_id: ProductId, reference_id: ReferenceId) -> Self {
        Self {
            product_id,
            reference_id,
        }
    }

    pub fn parse(product_id: impl AsRef<str>, reference_id: impl AsRef<str>) -> InventoryResult<Self> {
        Ok(Self::new(
            ProductId::parse(product_id)?,
            ReferenceId::parse(reference_id)?,
        ))
    }
}

impl core::fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.product_id, self.reference_id)
    }
}

/// Outcome of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// The state changed; the new value is carried.
    Applied(T),
    /// The requested state was already reached; nothing to do.
    Unchanged,
}

/// A claim against available quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    key: ReservationKey,
    location: Location,
    quantity: i64,
    state: ReservationState,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// Set once committed stock has left the location.
    consumed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Reservation {
    /// A new pending reservation. `ttl` of `None` never expires.
    pub fn pending(
        key: ReservationKey,
        location: Location,
        quantity: i64,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        if let Some(ttl) = ttl {
            if ttl <= Duration::zero() {
                return Err(InventoryError::invalid_argument("reservation ttl must be positive"));
            }
        }
        Ok(Self {
            key,
            location,
            quantity,
            state: ReservationState::Pending,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            consumed_at: None,
            updated_at: now,
        })
    }

    /// Rebuild a reservation from persisted state.
    pub fn restore(
        key: ReservationKey,
        location: Location,
        quantity: i64,
        state: ReservationState,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        consumed_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> InventoryResult<Self> {
        ensure_positive(quantity)?;
        if consumed_at.is_some() && state != ReservationState::Committed {
            return Err(InventoryError::invalid_state(format!(
                "reservation {key} is {state} but marked consumed"
            )));
        }
        Ok(Self {
            key,
            location,
            quantity,
            state,
            created_at,
            expires_at,
            consumed_at,
            updated_at,
        })
    }

    pub fn key(&self) -> &ReservationKey {
        &self.key
    }

    pub fn product_id(&self) -> &ProductId {
        &self.key.product_id
    }

    pub fn reference_id(&self) -> &ReferenceId {
        &self.key.reference_id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.key.product_id.clone(), self.location.clone())
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        self.consumed_at
    }

    /// Whether this reservation's quantity still counts towards the record's
    /// reserved quantity: pending, or committed but not yet consumed.
    pub fn holds_stock(&self) -> bool {
        match self.state {
            ReservationState::Pending => true,
            ReservationState::Committed => self.consumed_at.is_none(),
            ReservationState::Released | ReservationState::Expired => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ReservationState::Pending
    }

    /// Pending and past its TTL.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn release(&self, now: DateTime<Utc>) -> InventoryResult<Transition<Self>> {
        match self.state {
            ReservationState::Pending => Ok(Transition::Applied(self.with_state(ReservationState::Released, now))),
            ReservationState::Released => Ok(Transition::Unchanged),
            other => Err(InventoryError::already_terminal(other)),
        }
    }

    pub fn commit(&self, now: DateTime<Utc>) -> InventoryResult<Transition<Self>> {
        match self.state {
            ReservationState::Pending => Ok(Transition::Applied(self.with_state(ReservationState::Committed, now))),
            ReservationState::Committed => Ok(Transition::Unchanged),
            other => Err(InventoryError::already_terminal(other)),
        }
    }

    /// Record that committed stock has shipped.
    pub fn consume(&self, now: DateTime<Utc>) -> InventoryResult<Transition<Self>> {
        match self.state {
            ReservationState::Committed if self.consumed_at.is_some() => Ok(Transition::Unchanged),
            ReservationState::Committed => Ok(Transition::Applied(Self {
                consumed_at: Some(now),
                updated_at: now,
                ..self.clone()
            })),
            ReservationState::Pending => Err(InventoryError::invalid_state(format!(
                "reservation {} must be committed before it is consumed",
                self.key
            ))),
            other => Err(InventoryError::already_terminal(other)),
        }
    }

    pub fn expire(&self, now: DateTime<Utc>) -> InventoryResult<Self> {
        if !self.is_due(now) {
            return Err(InventoryError::invalid_state(format!(
                "reservation {} is not due for expiry",
                self.key
            )));
        }
        Ok(self.with_state(ReservationState::Expired, now))
    }

    fn with_state(&self, state: ReservationState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            updated_at: now,
            ..self.clone()
        }
    }
}
