//! Order-related types and identifiers.
//!
//! Provides order side, time-in-force, and the venue-assigned order id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// The side whose fills reduce a position of the given sign.
    ///
    /// Returns `None` for a flat position.
    pub fn reducing(position: rust_decimal::Decimal) -> Option<Self> {
        if position.is_sign_positive() && !position.is_zero() {
            Some(Self::Sell)
        } else if position.is_sign_negative() && !position.is_zero() {
            Some(Self::Buy)
        } else {
            None
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled. Passive quotes rest on the book with this.
    #[default]
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Fill-or-kill: the whole order crosses now or nothing does. First
    /// liquidation attempt of a forced exit.
    #[serde(rename = "FOK")]
    FillOrKill,
    /// Fill-and-kill: fill what crosses now, cancel the remainder.
    /// Fallback and retry liquidation orders.
    #[serde(rename = "FAK")]
    FillAndKill,
}

impl TimeInForce {
    /// True if the order never rests on the book.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::FillOrKill | Self::FillAndKill)
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::FillOrKill => write!(f, "FOK"),
            Self::FillAndKill => write!(f, "FAK"),
        }
    }
}

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
