//! Quoting and execution records.
//!
//! This module provides types for:
//! - Target quotes produced each tick
//! - Order requests sent to the gateway
//! - Live orders as seen by the lifecycle manager
//! - Confirmed fills reported by the gateway

use serde::{Deserialize, Serialize};

use crate::market::TokenId;
use crate::order::{OrderId, OrderSide, TimeInForce};
use crate::{Price, Size};

// ============================================================================
// Quote
// ============================================================================

/// Two-sided target quote for one token.
///
/// Ephemeral: recomputed every tick and never persisted. A zero size on a
/// side means quoting is suppressed on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub token: TokenId,
    pub bid_price: Price,
    pub bid_size: Size,
    pub ask_price: Price,
    pub ask_size: Size,
}

impl Quote {
    #[must_use]
    pub fn new(
        token: TokenId,
        bid_price: Price,
        bid_size: Size,
        ask_price: Price,
        ask_size: Size,
    ) -> Self {
        Self {
            token,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
        }
    }

    /// Price for the given side (bid for buy, ask for sell).
    #[must_use]
    pub fn price(&self, side: OrderSide) -> Price {
        match side {
            OrderSide::Buy => self.bid_price,
            OrderSide::Sell => self.ask_price,
        }
    }

    /// Size for the given side.
    #[must_use]
    pub fn size(&self, side: OrderSide) -> Size {
        match side {
            OrderSide::Buy => self.bid_size,
            OrderSide::Sell => self.ask_size,
        }
    }

    pub fn set_price(&mut self, side: OrderSide, price: Price) {
        match side {
            OrderSide::Buy => self.bid_price = price,
            OrderSide::Sell => self.ask_price = price,
        }
    }

    pub fn set_size(&mut self, side: OrderSide, size: Size) {
        match side {
            OrderSide::Buy => self.bid_size = size,
            OrderSide::Sell => self.ask_size = size,
        }
    }

    /// Quoted spread: ask - bid.
    #[must_use]
    pub fn spread(&self) -> Price {
        self.ask_price - self.bid_price
    }

    /// True if both sides are suppressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bid_size.is_zero() && self.ask_size.is_zero()
    }
}

// ============================================================================
// Order Request
// ============================================================================

/// Order submission sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token: TokenId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    #[serde(default)]
    pub tif: TimeInForce,
}

impl OrderRequest {
    /// Resting limit order for a passive quote.
    #[must_use]
    pub fn passive(token: TokenId, side: OrderSide, price: Price, size: Size) -> Self {
        Self {
            token,
            side,
            price,
            size,
            tif: TimeInForce::GoodTilCancelled,
        }
    }

    /// Marketable fill-and-kill order used for liquidation.
    #[must_use]
    pub fn liquidation(token: TokenId, side: OrderSide, price: Price, size: Size) -> Self {
        Self {
            token,
            side,
            price,
            size,
            tif: TimeInForce::FillAndKill,
        }
    }

    /// The same order under another time-in-force.
    #[must_use]
    pub fn with_tif(self, tif: TimeInForce) -> Self {
        Self { tif, ..self }
    }
}

// ============================================================================
// Live Order
// ============================================================================

/// A resting order on the venue.
///
/// The gateway is authoritative; this is the lifecycle manager's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOrder {
    pub order_id: OrderId,
    pub token: TokenId,
    pub side: OrderSide,
    pub price: Price,
    /// Unfilled quantity.
    pub remaining: Size,
    /// Submission time (Unix milliseconds).
    pub submitted_at_ms: u64,
}

impl LiveOrder {
    /// Reduce remaining size by a fill. Returns true if fully filled.
    pub fn apply_fill(&mut self, size: Size) -> bool {
        if size >= self.remaining {
            self.remaining = Size::ZERO;
        } else {
            self.remaining = self.remaining - size;
        }
        self.remaining.is_zero()
    }

    /// Age relative to `now_ms`.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.submitted_at_ms)
    }
}

// ============================================================================
// Fill
// ============================================================================

/// Confirmed execution reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub token: TokenId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// Execution time (Unix milliseconds).
    pub timestamp_ms: u64,
}

impl Fill {
    #[must_use]
    pub fn new(
        order_id: OrderId,
        token: TokenId,
        side: OrderSide,
        price: Price,
        size: Size,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            order_id,
            token,
            side,
            price,
            size,
            timestamp_ms,
        }
    }
}
