//! Per-token position limits.
//!
//! Pure and stateless: the same inputs always produce the same quote.

use pmm_core::config::SIZE_INCREMENT;
use pmm_core::{OrderSide, Quote, RiskConfig, Size, TokenId, TradableToken};
use rust_decimal::Decimal;
use tracing::trace;

use crate::error::{RiskError, RiskResult};

/// Side whose fills would increase `|position|`.
///
/// Flat positions have no single accumulating side; both sides add exposure.
#[must_use]
pub fn accumulating_side(position: Decimal) -> Option<OrderSide> {
    OrderSide::reducing(position).map(|s| s.opposite())
}

/// Enforces the inventory cap on target quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskController;

impl RiskController {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Shrink or suppress quote sizes for the current position.
    ///
    /// The accumulating side scales by `1 - |x|/cap` and never exceeds the
    /// remaining headroom; at or beyond the cap it is zero. The reducing side
    /// keeps its size. Sizes are rounded down to the share increment, and a
    /// side below the token's minimum order size is suppressed.
    #[must_use]
    pub fn apply_limits(
        &self,
        token: &TradableToken,
        mut quote: Quote,
        position: Decimal,
        config: &RiskConfig,
    ) -> Quote {
        let cap = config.max_position;
        let exposure = position.abs();

        for side in [OrderSide::Buy, OrderSide::Sell] {
            let desired = quote.size(side);
            let accumulating = match accumulating_side(position) {
                Some(acc) => acc == side,
                None => true,
            };

            let mut size = if !accumulating {
                desired
            } else if exposure >= cap || cap <= Decimal::ZERO {
                Size::ZERO
            } else {
                let ratio = exposure / cap;
                let scaled = desired.inner() * (Decimal::ONE - ratio);
                Size::new(scaled.min(cap - exposure))
            };

            size = size.round_to_lot(SIZE_INCREMENT);
            if size < token.min_order_size {
                size = Size::ZERO;
            }
            if size != desired {
                trace!(
                    token = %token.id.short(),
                    side = %side,
                    desired = %desired,
                    size = %size,
                    position = %position,
                    "Size limited"
                );
            }
            quote.set_size(side, size);
        }
        quote
    }

    /// Verify the ledger invariant `|x| <= cap`.
    pub fn check_invariant(
        &self,
        token: &TokenId,
        position: Decimal,
        config: &RiskConfig,
    ) -> RiskResult<()> {
        if position.abs() > config.max_position {
            return Err(RiskError::CapBreached {
                token: token.clone(),
                size: position,
                cap: config.max_position,
            });
        }
        Ok(())
    }
}
