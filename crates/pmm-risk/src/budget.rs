//! Process-wide notional budget.
//!
//! The only mutable state shared across market loops. Each loop publishes the
//! notional of the tokens it owns after every tick; quoting on the
//! accumulating side stops while the aggregate is at or above the limit.

use std::collections::HashMap;

use parking_lot::Mutex;
use pmm_core::{OrderSide, Quote, Size, TokenId};
use rust_decimal::Decimal;
use tracing::debug;

use crate::controller::accumulating_side;

/// Aggregate notional (`sum |size| * avg_price`) across all tokens.
#[derive(Debug, Default)]
pub struct RiskBudget {
    notional: Mutex<HashMap<TokenId, Decimal>>,
}

impl RiskBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current notional for a token. Zero removes the entry.
    pub fn update(&self, token: &TokenId, notional: Decimal) {
        let mut map = self.notional.lock();
        if notional.is_zero() {
            map.remove(token);
        } else {
            map.insert(token.clone(), notional.abs());
        }
    }

    /// Aggregate notional.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.notional.lock().values().copied().sum()
    }

    /// Zero the accumulating side(s) while the budget is exhausted.
    ///
    /// `limit = None` disables the budget.
    #[must_use]
    pub fn apply(&self, mut quote: Quote, position: Decimal, limit: Option<Decimal>) -> Quote {
        let Some(limit) = limit else {
            return quote;
        };
        let total = self.total();
        if total < limit {
            return quote;
        }

        let sides: &[OrderSide] = match accumulating_side(position) {
            Some(OrderSide::Buy) => &[OrderSide::Buy],
            Some(OrderSide::Sell) => &[OrderSide::Sell],
            None => &[OrderSide::Buy, OrderSide::Sell],
        };
        for side in sides {
            quote.set_size(*side, Size::ZERO);
        }
        debug!(
            token = %quote.token.short(),
            total = %total,
            limit = %limit,
            "Global budget exhausted, accumulating side suppressed"
        );
        quote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::Price;
    use rust_decimal_macros::dec;

    fn quote() -> Quote {
        Quote::new(
            TokenId::new("a"),
            Price::new(dec!(0.4)),
            Size::new(dec!(10)),
            Price::new(dec!(0.6)),
            Size::new(dec!(10)),
        )
    }

    #[test]
    fn test_total_and_update() {
        let budget = RiskBudget::new();
        budget.update(&TokenId::new("a"), dec!(30));
        budget.update(&TokenId::new("b"), dec!(-20));
        assert_eq!(budget.total(), dec!(50));
        budget.update(&TokenId::new("a"), dec!(0));
        assert_eq!(budget.total(), dec!(20));
    }

    #[test]
    fn test_under_limit_passes_through() {
        let budget = RiskBudget::new();
        budget.update(&TokenId::new("a"), dec!(30));
        let q = budget.apply(quote(), dec!(10), Some(dec!(50)));
        assert_eq!(q, quote());
        let q = budget.apply(quote(), dec!(10), None);
        assert_eq!(q, quote());
    }

    #[test]
    fn test_exhausted_budget_blocks_accumulation() {
        let budget = RiskBudget::new();
        budget.update(&TokenId::new("a"), dec!(50));

        let q = budget.apply(quote(), dec!(10), Some(dec!(50)));
        assert!(q.bid_size.is_zero());
        assert_eq!(q.ask_size.inner(), dec!(10));

        let q = budget.apply(quote(), dec!(-10), Some(dec!(50)));
        assert_eq!(q.bid_size.inner(), dec!(10));
        assert!(q.ask_size.is_zero());

        let q = budget.apply(quote(), dec!(0), Some(dec!(50)));
        assert!(q.is_empty());
    }
}
