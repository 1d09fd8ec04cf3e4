//! Kinds of quantity-affecting operations.

use serde::{Deserialize, Serialize};

/// Type of a quantity-affecting operation, as written to the transaction log
/// and carried by inventory update events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Stock intake (adds to total).
    In,
    /// Stock leaving the location (consumed reservation).
    Out,
    /// Quantity moved from available to reserved.
    Reserve,
    /// Reserved quantity returned to available (explicit release or expiry).
    Release,
    /// Manual correction of the total.
    Adjust,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::In => "IN",
            TransactionType::Out => "OUT",
            TransactionType::Reserve => "RESERVE",
            TransactionType::Release => "RELEASE",
            TransactionType::Adjust => "ADJUST",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = crate::InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            "RESERVE" => Ok(Self::Reserve),
            "RELEASE" => Ok(Self::Release),
            "ADJUST" => Ok(Self::Adjust),
            other => Err(crate::InventoryError::invalid_argument(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}
