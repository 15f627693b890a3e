//! Time- and P&L-driven exit scheduling.
//!
//! One state machine per token:
//!
//! ```text
//! FLAT --fill--> HOLDING --age >= T1--> WALKING_DOWN --age >= T2--> FORCED_EXIT
//!                   |                        |                          |
//!                   +------ SL / TP ---------+------------------------->+
//! any state --size == 0--> FLAT
//! ```
//!
//! While walking, the exit price moves from the anchor (the passive exit
//! price when walking began) toward mid. In FORCED_EXIT passive quoting
//! stops and a marketable order is issued: fill-or-kill first, then
//! fill-and-kill every `liquidation_retry_ms` until the position is flat.

use std::collections::HashMap;

use pmm_core::{
    BookSnapshot, OrderRequest, OrderSide, Price, Quote, RiskConfig, Size, TimeInForce, TokenId,
    TradableToken,
};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ledger::Position;

/// Exit state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitState {
    #[default]
    Flat,
    Holding,
    WalkingDown,
    ForcedExit,
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "FLAT"),
            Self::Holding => write!(f, "HOLDING"),
            Self::WalkingDown => write!(f, "WALKING_DOWN"),
            Self::ForcedExit => write!(f, "FORCED_EXIT"),
        }
    }
}

/// Why a position is being force-liquidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForcedExitReason {
    /// Held past the stale-position threshold.
    Stale { age_ms: u64 },
    /// Unrealized loss beyond the stop-loss.
    StopLoss { pnl: Decimal },
    /// Unrealized gain beyond the take-profit.
    TakeProfit { pnl: Decimal },
    /// Ledger size exceeded the cap.
    InvariantBreach { size: Decimal },
}

impl std::fmt::Display for ForcedExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale { age_ms } => write!(f, "Stale({}ms)", age_ms),
            Self::StopLoss { pnl } => write!(f, "StopLoss({})", pnl),
            Self::TakeProfit { pnl } => write!(f, "TakeProfit({})", pnl),
            Self::InvariantBreach { size } => write!(f, "InvariantBreach({})", size),
        }
    }
}

impl ForcedExitReason {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stale { .. } => "stale",
            Self::StopLoss { .. } => "stop_loss",
            Self::TakeProfit { .. } => "take_profit",
            Self::InvariantBreach { .. } => "invariant_breach",
        }
    }
}

/// What the exit scheduler requires of this tick's quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    /// Quote normally.
    Passive,
    /// Suppress the accumulating side and, when a mid is available, move the
    /// reducing side to the walk price.
    Walk { side: OrderSide, price: Option<Price> },
    /// Suppress all passive quoting. Send `order` if present.
    Liquidate { order: Option<OrderRequest> },
}

impl ExitAction {
    /// Apply the override to a target quote.
    #[must_use]
    pub fn apply(&self, mut quote: Quote) -> Quote {
        match self {
            Self::Passive => quote,
            Self::Walk { side, price } => {
                quote.set_size(side.opposite(), Size::ZERO);
                if let Some(price) = price {
                    quote.set_price(*side, *price);
                }
                quote
            }
            Self::Liquidate { .. } => {
                quote.set_size(OrderSide::Buy, Size::ZERO);
                quote.set_size(OrderSide::Sell, Size::ZERO);
                quote
            }
        }
    }

    /// True if passive quoting must stop entirely.
    #[must_use]
    pub fn is_liquidating(&self) -> bool {
        matches!(self, Self::Liquidate { .. })
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitDecision {
    pub state: ExitState,
    /// Set when this evaluation changed the state.
    pub transition: Option<(ExitState, ExitState)>,
    pub action: ExitAction,
}

#[derive(Debug, Clone, Default)]
struct TokenExit {
    state: ExitState,
    /// Sign of the position the state refers to.
    direction: Decimal,
    anchor: Option<Price>,
    reason: Option<ForcedExitReason>,
    last_liquidation_ms: Option<u64>,
    /// Liquidation orders issued in this forced exit.
    liquidation_attempts: u32,
}

/// Exit state machines for a set of tokens.
#[derive(Debug, Default)]
pub struct ExitScheduler {
    tokens: HashMap<TokenId, TokenExit>,
}

impl ExitScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a token.
    #[must_use]
    pub fn state_of(&self, token: &TokenId) -> ExitState {
        self.tokens.get(token).map(|t| t.state).unwrap_or_default()
    }

    /// Forced-exit reason, if in FORCED_EXIT.
    #[must_use]
    pub fn reason_of(&self, token: &TokenId) -> Option<ForcedExitReason> {
        self.tokens.get(token).and_then(|t| t.reason.clone())
    }

    /// Force a non-flat position into FORCED_EXIT regardless of age.
    pub fn force(&mut self, token: &TokenId, position: &Position, reason: ForcedExitReason) {
        if position.is_flat() {
            return;
        }
        let entry = self.tokens.entry(token.clone()).or_default();
        if entry.state == ExitState::ForcedExit {
            return;
        }
        warn!(token = %token.short(), from = %entry.state, reason = %reason, "Forced exit");
        entry.state = ExitState::ForcedExit;
        entry.direction = position.size.signum();
        entry.reason = Some(reason);
    }

    /// Re-evaluate the state machine for one token.
    ///
    /// * `book` - latest snapshot, already checked for freshness by the caller
    ///   (None if unavailable or stale)
    /// * `passive_exit` - the price the quote engine would rest on the
    ///   reducing side this tick, used as the walk anchor
    pub fn evaluate(
        &mut self,
        token: &TradableToken,
        position: &Position,
        book: Option<&BookSnapshot>,
        passive_exit: Option<Price>,
        config: &RiskConfig,
        now_ms: u64,
    ) -> ExitDecision {
        let entry = self.tokens.entry(token.id.clone()).or_default();
        let before = entry.state;

        if position.is_flat() {
            *entry = TokenExit::default();
            return decision(before, ExitState::Flat, ExitAction::Passive);
        }

        let direction = position.size.signum();
        if entry.state == ExitState::Flat || entry.direction != direction {
            // New exposure, or the position flipped through zero
            *entry = TokenExit {
                state: ExitState::Holding,
                direction,
                ..Default::default()
            };
        }

        let age_ms = position.age_ms(now_ms);
        let mid = book.and_then(BookSnapshot::mid);
        let reducing = if direction.is_sign_positive() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };

        if matches!(entry.state, ExitState::Holding | ExitState::WalkingDown) {
            if let Some(reason) = pnl_breach(position, mid, config) {
                entry.state = ExitState::ForcedExit;
                entry.reason = Some(reason);
            } else if age_ms >= config.stale_position_ms {
                entry.state = ExitState::ForcedExit;
                entry.reason = Some(ForcedExitReason::Stale { age_ms });
            } else if entry.state == ExitState::Holding && age_ms >= config.walk_start_ms {
                entry.state = ExitState::WalkingDown;
                entry.anchor =
                    passive_exit.or_else(|| book.and_then(|b| b.same_side_best(reducing)));
            }
        }

        let action = match entry.state {
            ExitState::Flat | ExitState::Holding => ExitAction::Passive,
            ExitState::WalkingDown => {
                if entry.anchor.is_none() {
                    entry.anchor = passive_exit;
                }
                let price = match (entry.anchor, mid) {
                    (Some(anchor), Some(mid)) => {
                        Some(walk_price(anchor, mid, reducing, age_ms, token.tick_size, config))
                    }
                    _ => None,
                };
                ExitAction::Walk {
                    side: reducing,
                    price,
                }
            }
            ExitState::ForcedExit => {
                let due = entry
                    .last_liquidation_ms
                    .map_or(true, |t| now_ms.saturating_sub(t) >= config.liquidation_retry_ms);
                let order = if due {
                    liquidation_order(token, position, reducing, book, config).map(|order| {
                        if entry.liquidation_attempts == 0 {
                            order.with_tif(TimeInForce::FillOrKill)
                        } else {
                            order
                        }
                    })
                } else {
                    None
                };
                if order.is_some() {
                    entry.last_liquidation_ms = Some(now_ms);
                    entry.liquidation_attempts += 1;
                }
                ExitAction::Liquidate { order }
            }
        };

        if before != entry.state {
            info!(
                token = %token.id.short(),
                from = %before,
                to = %entry.state,
                age_ms,
                size = %position.size,
                reason = ?entry.reason,
                "Exit state transition"
            );
        }
        decision(before, entry.state, action)
    }
}

fn decision(before: ExitState, after: ExitState, action: ExitAction) -> ExitDecision {
    ExitDecision {
        state: after,
        transition: (before != after).then_some((before, after)),
        action,
    }
}

fn pnl_breach(position: &Position, mid: Option<Price>, config: &RiskConfig) -> Option<ForcedExitReason> {
    let pnl = position.unrealized_pnl(mid?);
    if let Some(stop) = config.stop_loss {
        if pnl <= -stop {
            return Some(ForcedExitReason::StopLoss { pnl });
        }
    }
    if let Some(take) = config.take_profit {
        if pnl >= take {
            return Some(ForcedExitReason::TakeProfit { pnl });
        }
    }
    None
}

/// `anchor + (mid - anchor) * f(progress)`, rounded away from mid on the
/// anchor's side (ask up, bid down) and clamped to the price domain.
fn walk_price(
    anchor: Price,
    mid: Price,
    side: OrderSide,
    age_ms: u64,
    tick: Price,
    config: &RiskConfig,
) -> Price {
    let span = config.walk_duration_ms();
    let progress = if span == 0 {
        Decimal::ONE
    } else {
        Decimal::from(age_ms.saturating_sub(config.walk_start_ms)) / Decimal::from(span)
    };
    let fraction = config.walk_curve.apply(progress);
    let raw = anchor + (mid - anchor) * fraction;
    let rounded = match side {
        OrderSide::Sell => raw.round_up_to_tick(tick),
        OrderSide::Buy => raw.round_down_to_tick(tick),
    };
    rounded.clamp_to_domain(tick)
}

/// Marketable order for the full position, priced through the opposite best.
///
/// Returns None when the opposite side of the book is unavailable; the next
/// tick retries.
fn liquidation_order(
    token: &TradableToken,
    position: &Position,
    side: OrderSide,
    book: Option<&BookSnapshot>,
    config: &RiskConfig,
) -> Option<OrderRequest> {
    let Some(best) = book.and_then(|b| b.opposite_best(side)) else {
        warn!(token = %token.id.short(), side = %side, "No opposite liquidity for liquidation");
        return None;
    };
    let offset = config.liquidation_offset(token.tick_size);
    let price = match side {
        OrderSide::Sell => (best - offset).round_down_to_tick(token.tick_size),
        OrderSide::Buy => (best + offset).round_up_to_tick(token.tick_size),
    }
    .clamp_to_domain(token.tick_size);

    Some(OrderRequest::liquidation(
        token.id.clone(),
        side,
        price,
        Size::new(position.size.abs()),
    ))
}
