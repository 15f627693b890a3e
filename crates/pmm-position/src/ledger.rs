//! Per-token position ledger.
//!
//! Pure in-memory state. Each market loop owns the ledger entries of its own
//! tokens, so all mutations for a token are serialized by construction.

use std::collections::HashMap;

use pmm_core::{OrderSide, Price, Size, TokenId};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PositionError, PositionResult};

/// Inventory in one outcome token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub token: TokenId,
    /// Signed size in shares (positive = long).
    pub size: Decimal,
    /// Volume-weighted average entry price of the open size.
    pub avg_price: Decimal,
    /// Time of the last fill that increased `|size|` (Unix ms). None when flat.
    pub opened_at_ms: Option<u64>,
    /// Realized P&L in quote currency.
    pub realized_pnl: Decimal,
    /// Total fills applied.
    pub fill_count: u64,
}

impl Position {
    /// Zero state for a token.
    #[must_use]
    pub fn flat(token: TokenId) -> Self {
        Self {
            token,
            size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            opened_at_ms: None,
            realized_pnl: Decimal::ZERO,
            fill_count: 0,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    /// How long the current-direction exposure has been held.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        self.opened_at_ms
            .map(|t| now_ms.saturating_sub(t))
            .unwrap_or(0)
    }

    /// Mark-to-market P&L of the open size.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        (mark.inner() - self.avg_price) * self.size
    }

    /// Cost-basis notional `|size| * avg_price`.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size.abs() * self.avg_price
    }
}

/// Position ledger for a set of tokens.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<TokenId, Position>,
}

impl PositionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the zero-state entry for a token if it does not exist.
    pub fn ensure(&mut self, token: &TokenId) {
        self.positions
            .entry(token.clone())
            .or_insert_with(|| Position::flat(token.clone()));
    }

    /// Record a confirmed fill.
    ///
    /// Updates signed size and VWAP entry, realizes P&L on the reduced part,
    /// and moves the age clock to `at_ms` only when `|size|` grows or the
    /// position flips direction.
    pub fn apply_fill(
        &mut self,
        token: &TokenId,
        side: OrderSide,
        price: Price,
        size: Size,
        at_ms: u64,
    ) -> PositionResult<&Position> {
        if !size.is_positive() {
            return Err(PositionError::InvalidFill(format!(
                "non-positive size {size} for {token}"
            )));
        }
        if !price.in_unit_interval() {
            return Err(PositionError::InvalidFill(format!(
                "price {price} outside (0, 1) for {token}"
            )));
        }

        let pos = self
            .positions
            .entry(token.clone())
            .or_insert_with(|| Position::flat(token.clone()));

        let fill_size = size.inner();
        let fill_price = price.inner();
        let signed = match side {
            OrderSide::Buy => fill_size,
            OrderSide::Sell => -fill_size,
        };
        let old_size = pos.size;
        let new_size = old_size + signed;

        let reducing = !old_size.is_zero() && old_size.signum() != signed.signum();
        if reducing {
            let closed = fill_size.min(old_size.abs());
            pos.realized_pnl += (fill_price - pos.avg_price) * closed * old_size.signum();
        }

        if new_size.is_zero() {
            pos.avg_price = Decimal::ZERO;
            pos.opened_at_ms = None;
        } else if reducing && new_size.signum() != old_size.signum() {
            // Flipped: the remainder is a fresh position at the fill price
            pos.avg_price = fill_price;
            pos.opened_at_ms = Some(at_ms);
        } else if !reducing {
            let old_notional = old_size.abs() * pos.avg_price;
            pos.avg_price = (old_notional + fill_size * fill_price) / new_size.abs();
            pos.opened_at_ms = Some(at_ms);
        }

        pos.size = new_size;
        pos.fill_count += 1;

        debug!(
            token = %token.short(),
            side = %side,
            price = %price,
            size = %size,
            position = %pos.size,
            avg_price = %pos.avg_price,
            realized_pnl = %pos.realized_pnl,
            "Fill applied"
        );
        Ok(pos)
    }

    /// Bring a token's size to the venue's `venue_size`.
    ///
    /// The difference is booked as one synthetic fill at `price`, so the
    /// entry price, age clock and realized P&L follow the usual fill rules.
    /// Returns the difference applied (zero if already in agreement).
    pub fn restate(
        &mut self,
        token: &TokenId,
        venue_size: Decimal,
        price: Price,
        at_ms: u64,
    ) -> PositionResult<Decimal> {
        let drift = venue_size - self.size_of(token);
        if drift.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let side = if drift.is_sign_positive() {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        self.apply_fill(token, side, price, Size::new(drift.abs()), at_ms)?;
        Ok(drift)
    }

    /// Snapshot of a token's position; zero state if never traded.
    #[must_use]
    pub fn position_of(&self, token: &TokenId) -> Position {
        self.positions
            .get(token)
            .cloned()
            .unwrap_or_else(|| Position::flat(token.clone()))
    }

    /// Signed size for a token.
    #[must_use]
    pub fn size_of(&self, token: &TokenId) -> Decimal {
        self.positions
            .get(token)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    /// Iterate over all tracked positions.
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Cost-basis notional across all tracked tokens.
    #[must_use]
    pub fn total_notional(&self) -> Decimal {
        self.positions.values().map(Position::notional).sum()
    }
}
