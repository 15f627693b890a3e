//! Order lifecycle management.
//!
//! Reconciles the desired quote for a token against the orders believed to
//! be resting on the venue:
//! - Place when a side is idle and the desired size is nonzero
//! - Cancel when the desired size drops to zero
//! - Cancel-then-place when price or size drift past the thresholds
//! - Re-send unacknowledged cancels, resync after unresolved placements
//!
//! The manager never talks to the gateway. It returns [`LifecycleAction`]s
//! and the caller reports each outcome back through the `on_*` methods.
//! A side never gets a new placement while a cancel on it is unacknowledged.

use std::collections::HashMap;
use std::time::Duration;

use pmm_core::{
    Fill, LiveOrder, OrderId, OrderRequest, OrderSide, Price, Quote, RiskConfig, Size,
    TimeInForce, TokenId, TradableToken,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Lifecycle state of one order slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    /// Placement sent. `unresolved` once it timed out without an answer.
    Placing {
        request: OrderRequest,
        sent_at_ms: u64,
        unresolved: bool,
    },
    Live(LiveOrder),
    /// Cancel sent, acknowledgement outstanding.
    Canceling { order: LiveOrder, sent_at_ms: u64 },
}

impl SlotState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    #[must_use]
    pub fn is_canceling(&self) -> bool {
        matches!(self, Self::Canceling { .. })
    }

    fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Live(order) | Self::Canceling { order, .. } => Some(&order.order_id),
            _ => None,
        }
    }
}

/// Work the caller must perform against the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    Place(OrderRequest),
    /// Idempotent: an already-gone order is reported back as acknowledged.
    Cancel { token: TokenId, order_id: OrderId },
    /// Query open orders and feed them to `sync_open_orders`.
    SyncOpenOrders(TokenId),
}

#[derive(Debug, Default)]
struct SideSlot {
    state: SlotState,
    /// No placement before this time: rejected this tick, or rate limited.
    held_until_ms: Option<u64>,
    /// Consecutive rate-limited placements.
    rate_limit_strikes: u32,
}

impl SideSlot {
    fn is_held(&self, now_ms: u64) -> bool {
        self.held_until_ms.map_or(false, |until| now_ms < until)
    }
}

#[derive(Debug, Default)]
struct TokenOrders {
    bid: SideSlot,
    ask: SideSlot,
    /// Liquidation order in flight.
    exit: SlotState,
    /// Liquidation waiting for the reducing side to clear.
    pending_liquidation: Option<OrderRequest>,
    sync_requested: bool,
}

impl TokenOrders {
    fn side(&self, side: OrderSide) -> &SideSlot {
        match side {
            OrderSide::Buy => &self.bid,
            OrderSide::Sell => &self.ask,
        }
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut SideSlot {
        match side {
            OrderSide::Buy => &mut self.bid,
            OrderSide::Sell => &mut self.ask,
        }
    }

    fn slot_with_order_mut(&mut self, order_id: &OrderId) -> Option<&mut SideSlot> {
        [&mut self.bid, &mut self.ask]
            .into_iter()
            .find(|slot| slot.state.order_id() == Some(order_id))
    }
}

/// Order lifecycle manager for the tokens of one market loop.
#[derive(Debug, Default)]
pub struct OrderLifecycleManager {
    tokens: HashMap<TokenId, TokenOrders>,
}

impl OrderLifecycleManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Compare the desired quote with the tracked orders and decide what to
    /// send. Call repeatedly within a tick after reporting outcomes; the
    /// result converges to an empty list.
    pub fn reconcile(
        &mut self,
        token: &TradableToken,
        desired: &Quote,
        config: &RiskConfig,
        now_ms: u64,
    ) -> Vec<LifecycleAction> {
        let orders = self.tokens.entry(token.id.clone()).or_default();

        if orders.sync_requested {
            return vec![LifecycleAction::SyncOpenOrders(token.id.clone())];
        }

        let mut actions = Vec::new();
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let slot = orders.side_mut(side);
            if let Some(action) = reconcile_side(
                token,
                slot,
                side,
                desired.price(side),
                desired.size(side),
                config,
                now_ms,
            ) {
                actions.push(action);
            }
        }

        if let Some(action) = reconcile_exit(token, orders, now_ms) {
            actions.push(action);
        }
        actions
    }

    /// Queue a liquidation order. It is sent once the reducing side has no
    /// resting or canceling order and no earlier liquidation is in flight.
    /// A newer submission replaces a queued one.
    pub fn submit_liquidation(&mut self, order: OrderRequest) {
        let orders = self.tokens.entry(order.token.clone()).or_default();
        orders.pending_liquidation = Some(order);
    }

    /// Drop a queued liquidation that was not sent yet.
    pub fn cancel_liquidation(&mut self, token: &TokenId) {
        if let Some(orders) = self.tokens.get_mut(token) {
            orders.pending_liquidation = None;
        }
    }

    /// Cancel everything resting for a token (shutdown, market removal).
    pub fn cancel_all(&mut self, token: &TokenId, now_ms: u64) -> Vec<LifecycleAction> {
        let Some(orders) = self.tokens.get_mut(token) else {
            return Vec::new();
        };
        orders.pending_liquidation = None;

        let mut actions = Vec::new();
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let slot = orders.side_mut(side);
            match std::mem::take(&mut slot.state) {
                SlotState::Live(order) | SlotState::Canceling { order, .. } => {
                    actions.push(cancel_action(&order));
                    slot.state = SlotState::Canceling {
                        order,
                        sent_at_ms: now_ms,
                    };
                }
                other => slot.state = other,
            }
        }
        actions
    }

    /// Force a resync before the next placement (e.g. the gateway was
    /// unavailable and in-memory state may be behind).
    pub fn request_sync(&mut self, token: &TokenId) {
        self.tokens.entry(token.clone()).or_default().sync_requested = true;
    }

    // ========================================================================
    // Outcome callbacks
    // ========================================================================

    /// Placement acknowledged by the venue.
    ///
    /// Returns a cancel if the slot was already occupied by another order
    /// (the duplicate must not stay on the book).
    pub fn on_placed(
        &mut self,
        request: &OrderRequest,
        order_id: OrderId,
        now_ms: u64,
    ) -> Option<LifecycleAction> {
        let orders = self.tokens.entry(request.token.clone()).or_default();

        if request.tif.is_immediate() {
            debug!(
                token = %request.token.short(),
                order_id = %order_id,
                "Liquidation order acknowledged"
            );
            orders.exit = SlotState::Idle;
            return None;
        }

        let slot = orders.side_mut(request.side);
        slot.rate_limit_strikes = 0;
        match &slot.state {
            SlotState::Idle | SlotState::Placing { .. } => {
                debug!(
                    token = %request.token.short(),
                    side = %request.side,
                    price = %request.price,
                    size = %request.size,
                    order_id = %order_id,
                    "Order live"
                );
                slot.state = SlotState::Live(LiveOrder {
                    order_id,
                    token: request.token.clone(),
                    side: request.side,
                    price: request.price,
                    remaining: request.size,
                    submitted_at_ms: now_ms,
                });
                None
            }
            SlotState::Live(existing) | SlotState::Canceling { order: existing, .. } => {
                if existing.order_id == order_id {
                    return None;
                }
                warn!(
                    token = %request.token.short(),
                    side = %request.side,
                    order_id = %order_id,
                    tracked = %existing.order_id,
                    "Duplicate placement, canceling"
                );
                Some(LifecycleAction::Cancel {
                    token: request.token.clone(),
                    order_id,
                })
            }
        }
    }

    /// Placement rejected by the venue. The side stays idle for this tick.
    ///
    /// A killed fill-or-kill liquidation falls back to fill-and-kill at the
    /// same price; the returned placement must be sent right away.
    pub fn on_place_rejected(
        &mut self,
        request: &OrderRequest,
        now_ms: u64,
    ) -> Option<LifecycleAction> {
        let orders = self.tokens.entry(request.token.clone()).or_default();
        if request.tif.is_immediate() {
            if request.tif != TimeInForce::FillOrKill {
                orders.exit = SlotState::Idle;
                return None;
            }
            let fallback = request.clone().with_tif(TimeInForce::FillAndKill);
            info!(
                token = %request.token.short(),
                side = %request.side,
                size = %request.size,
                "Fill-or-kill liquidation not filled, falling back to fill-and-kill"
            );
            orders.exit = SlotState::Placing {
                request: fallback.clone(),
                sent_at_ms: now_ms,
                unresolved: false,
            };
            return Some(LifecycleAction::Place(fallback));
        }
        let slot = orders.side_mut(request.side);
        if matches!(slot.state, SlotState::Placing { .. }) {
            slot.state = SlotState::Idle;
        }
        slot.held_until_ms = Some(now_ms + 1);
        None
    }

    /// Placement refused by the venue's rate limiter. The side is held back
    /// for `backoff(strikes)`, growing with consecutive refusals. Returns the
    /// time until which the side is held.
    pub fn on_place_rate_limited(
        &mut self,
        request: &OrderRequest,
        now_ms: u64,
        backoff: impl FnOnce(u32) -> Duration,
    ) -> u64 {
        let orders = self.tokens.entry(request.token.clone()).or_default();
        if request.tif.is_immediate() {
            // The exit scheduler re-issues liquidations on its own interval.
            orders.exit = SlotState::Idle;
            return now_ms;
        }
        let slot = orders.side_mut(request.side);
        if matches!(slot.state, SlotState::Placing { .. }) {
            slot.state = SlotState::Idle;
        }
        slot.rate_limit_strikes = slot.rate_limit_strikes.saturating_add(1);
        let until = now_ms + backoff(slot.rate_limit_strikes).as_millis() as u64;
        slot.held_until_ms = Some(until);
        until
    }

    /// Placement outcome unknown (timeout or connection loss). The order may
    /// or may not rest on the venue, so open orders must be queried before
    /// anything else is placed for the token.
    pub fn on_place_timeout(&mut self, request: &OrderRequest) {
        let orders = self.tokens.entry(request.token.clone()).or_default();
        let slot = if request.tif.is_immediate() {
            &mut orders.exit
        } else {
            &mut orders.side_mut(request.side).state
        };
        if let SlotState::Placing { unresolved, .. } = slot {
            *unresolved = true;
        }
        orders.sync_requested = true;
        warn!(
            token = %request.token.short(),
            side = %request.side,
            "Placement outcome unknown, open orders will be resynced"
        );
    }

    /// Cancel acknowledged (including "order not found").
    pub fn on_cancel_acked(&mut self, token: &TokenId, order_id: &OrderId) -> bool {
        let Some(slot) = self
            .tokens
            .get_mut(token)
            .and_then(|orders| orders.slot_with_order_mut(order_id))
        else {
            return false;
        };
        debug!(token = %token.short(), order_id = %order_id, "Cancel acknowledged");
        slot.state = SlotState::Idle;
        true
    }

    /// Cancel failed. The order stays in `Canceling` and the cancel is
    /// re-sent once `cancel_timeout_ms` has elapsed.
    pub fn on_cancel_failed(&mut self, token: &TokenId, order_id: &OrderId) {
        let tracked = self
            .tokens
            .get(token)
            .and_then(|orders| {
                [&orders.bid, &orders.ask]
                    .into_iter()
                    .find(|slot| slot.state.order_id() == Some(order_id))
            })
            .is_some_and(|slot| slot.state.is_canceling());
        if tracked {
            warn!(token = %token.short(), order_id = %order_id, "Cancel failed, will retry");
        }
    }

    /// Apply a fill to the tracked order. Returns false for orders this
    /// manager does not track (e.g. liquidation orders).
    pub fn on_fill(&mut self, fill: &Fill) -> bool {
        let Some(slot) = self
            .tokens
            .get_mut(&fill.token)
            .and_then(|orders| orders.slot_with_order_mut(&fill.order_id))
        else {
            return false;
        };

        match &mut slot.state {
            SlotState::Live(order) => {
                if order.apply_fill(fill.size) {
                    debug!(
                        token = %fill.token.short(),
                        order_id = %fill.order_id,
                        "Order fully filled"
                    );
                    slot.state = SlotState::Idle;
                }
            }
            // Stays canceling; the venue answers the cancel with "not found".
            SlotState::Canceling { order, .. } => {
                order.apply_fill(fill.size);
            }
            _ => {}
        }
        true
    }

    /// Rebuild the view of a token's orders from the venue's open orders.
    ///
    /// The venue is authoritative: tracked orders missing from it become
    /// idle, an unresolved placement adopts a matching venue order, and
    /// surplus venue orders are returned as cancels.
    pub fn sync_open_orders(
        &mut self,
        token: &TokenId,
        venue: Vec<LiveOrder>,
        now_ms: u64,
    ) -> Vec<LifecycleAction> {
        let orders = self.tokens.entry(token.clone()).or_default();
        orders.sync_requested = false;
        if !orders.exit.is_idle() {
            // Immediate orders never rest; whatever happened shows up as fills.
            orders.exit = SlotState::Idle;
        }

        let mut actions = Vec::new();
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let mut on_side: Vec<LiveOrder> = venue
                .iter()
                .filter(|o| o.side == side && &o.token == token)
                .cloned()
                .collect();
            let slot = orders.side_mut(side);

            slot.state = match std::mem::take(&mut slot.state) {
                SlotState::Live(tracked) => match take_by_id(&mut on_side, &tracked.order_id) {
                    Some(venue_order) => SlotState::Live(LiveOrder {
                        remaining: venue_order.remaining,
                        ..tracked
                    }),
                    None => SlotState::Idle,
                },
                SlotState::Canceling { order, sent_at_ms } => {
                    match take_by_id(&mut on_side, &order.order_id) {
                        Some(venue_order) => SlotState::Canceling {
                            order: LiveOrder {
                                remaining: venue_order.remaining,
                                ..order
                            },
                            sent_at_ms,
                        },
                        None => SlotState::Idle,
                    }
                }
                SlotState::Placing { request, .. } => {
                    let adopted = on_side
                        .iter()
                        .position(|o| o.price == request.price)
                        .or(if on_side.is_empty() { None } else { Some(0) });
                    match adopted {
                        Some(idx) => {
                            let order = on_side.remove(idx);
                            info!(
                                token = %token.short(),
                                side = %side,
                                order_id = %order.order_id,
                                "Adopted order from resync"
                            );
                            SlotState::Live(order)
                        }
                        None => SlotState::Idle,
                    }
                }
                SlotState::Idle => {
                    if on_side.is_empty() {
                        SlotState::Idle
                    } else {
                        SlotState::Live(on_side.remove(0))
                    }
                }
            };

            for orphan in on_side {
                warn!(
                    token = %token.short(),
                    side = %side,
                    order_id = %orphan.order_id,
                    "Untracked open order, canceling"
                );
                actions.push(cancel_action(&orphan));
            }
        }

        debug!(
            token = %token.short(),
            orphans = actions.len(),
            now_ms,
            "Open orders resynced"
        );
        actions
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Slot state for a token side (Idle if never seen).
    #[must_use]
    pub fn slot(&self, token: &TokenId, side: OrderSide) -> SlotState {
        self.tokens
            .get(token)
            .map(|orders| orders.side(side).state.clone())
            .unwrap_or_default()
    }

    /// Resting order on a side, if live.
    #[must_use]
    pub fn live_order(&self, token: &TokenId, side: OrderSide) -> Option<&LiveOrder> {
        match &self.tokens.get(token)?.side(side).state {
            SlotState::Live(order) => Some(order),
            _ => None,
        }
    }

    /// True if a cancel on this side is awaiting acknowledgement.
    #[must_use]
    pub fn has_unacked_cancel(&self, token: &TokenId, side: OrderSide) -> bool {
        self.tokens
            .get(token)
            .is_some_and(|orders| orders.side(side).state.is_canceling())
    }

    /// Liquidation order queued but not yet sent.
    #[must_use]
    pub fn pending_liquidation(&self, token: &TokenId) -> Option<&OrderRequest> {
        self.tokens.get(token)?.pending_liquidation.as_ref()
    }

    /// Number of orders believed to rest on the venue (live or canceling).
    #[must_use]
    pub fn resting_count(&self) -> usize {
        self.tokens
            .values()
            .flat_map(|orders| [&orders.bid, &orders.ask])
            .filter(|slot| slot.state.order_id().is_some())
            .count()
    }
}

fn reconcile_side(
    token: &TradableToken,
    slot: &mut SideSlot,
    side: OrderSide,
    desired_price: Price,
    desired_size: Size,
    config: &RiskConfig,
    now_ms: u64,
) -> Option<LifecycleAction> {
    match &slot.state {
        SlotState::Idle => {
            if desired_size.is_zero() || slot.is_held(now_ms) {
                return None;
            }
            let request =
                OrderRequest::passive(token.id.clone(), side, desired_price, desired_size);
            slot.state = SlotState::Placing {
                request: request.clone(),
                sent_at_ms: now_ms,
                unresolved: false,
            };
            Some(LifecycleAction::Place(request))
        }
        SlotState::Placing { .. } => None,
        SlotState::Live(order) => {
            let reason = if desired_size.is_zero() {
                Some("side suppressed")
            } else if order.age_ms(now_ms) < config.min_refresh_interval_ms {
                None
            } else if order.price.distance(desired_price) > token.tick_size.inner() {
                Some("price drift")
            } else if size_diverges(order.remaining, desired_size, config.size_tolerance) {
                Some("size drift")
            } else {
                None
            };
            let reason = reason?;
            debug!(
                token = %token.id.short(),
                side = %side,
                order_id = %order.order_id,
                live_price = %order.price,
                desired_price = %desired_price,
                live_size = %order.remaining,
                desired_size = %desired_size,
                reason,
                "Canceling order"
            );
            let order = order.clone();
            let action = cancel_action(&order);
            slot.state = SlotState::Canceling {
                order,
                sent_at_ms: now_ms,
            };
            Some(action)
        }
        SlotState::Canceling { order, sent_at_ms } => {
            if now_ms.saturating_sub(*sent_at_ms) < config.cancel_timeout_ms {
                return None;
            }
            warn!(
                token = %token.id.short(),
                side = %side,
                order_id = %order.order_id,
                waited_ms = now_ms.saturating_sub(*sent_at_ms),
                "Cancel unacknowledged, re-sending"
            );
            let order = order.clone();
            let action = cancel_action(&order);
            slot.state = SlotState::Canceling {
                order,
                sent_at_ms: now_ms,
            };
            Some(action)
        }
    }
}

fn reconcile_exit(
    token: &TradableToken,
    orders: &mut TokenOrders,
    now_ms: u64,
) -> Option<LifecycleAction> {
    let side = orders.pending_liquidation.as_ref()?.side;
    if !orders.exit.is_idle() || !orders.side(side).state.is_idle() {
        return None;
    }
    let request = orders.pending_liquidation.take()?;
    info!(
        token = %token.id.short(),
        side = %request.side,
        price = %request.price,
        size = %request.size,
        "Sending liquidation order"
    );
    orders.exit = SlotState::Placing {
        request: request.clone(),
        sent_at_ms: now_ms,
        unresolved: false,
    };
    Some(LifecycleAction::Place(request))
}

fn size_diverges(live: Size, desired: Size, tolerance: Decimal) -> bool {
    (live.inner() - desired.inner()).abs() > desired.inner() * tolerance
}

fn cancel_action(order: &LiveOrder) -> LifecycleAction {
    LifecycleAction::Cancel {
        token: order.token.clone(),
        order_id: order.order_id.clone(),
    }
}

fn take_by_id(orders: &mut Vec<LiveOrder>, id: &OrderId) -> Option<LiveOrder> {
    let idx = orders.iter().position(|o| &o.order_id == id)?;
    Some(orders.remove(idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::{MarketId, Outcome};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn token() -> TradableToken {
        TradableToken {
            id: TokenId::new("tok"),
            market: MarketId::new("m"),
            outcome: Outcome::Yes,
            tick_size: Price::new(dec!(0.01)),
            min_order_size: Size::ZERO,
        }
    }

    fn config() -> RiskConfig {
        RiskConfig {
            min_refresh_interval_ms: 2_000,
            cancel_timeout_ms: 5_000,
            size_tolerance: dec!(0.1),
            ..Default::default()
        }
    }

    fn quote(bid: Decimal, bid_size: Decimal, ask: Decimal, ask_size: Decimal) -> Quote {
        Quote::new(
            token().id,
            Price::new(bid),
            Size::new(bid_size),
            Price::new(ask),
            Size::new(ask_size),
        )
    }

    fn places(actions: &[LifecycleAction]) -> Vec<&OrderRequest> {
        actions
            .iter()
            .filter_map(|a| match a {
                LifecycleAction::Place(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Place both sides and acknowledge them at `now`.
    fn establish(mgr: &mut OrderLifecycleManager, q: &Quote, now: u64) {
        let actions = mgr.reconcile(&token(), q, &config(), now);
        assert_eq!(actions.len(), 2);
        for (i, action) in actions.iter().enumerate() {
            let LifecycleAction::Place(req) = action else {
                panic!("expected placement");
            };
            assert!(mgr
                .on_placed(req, OrderId::new(format!("o{i}")), now)
                .is_none());
        }
    }

    #[test]
    fn test_places_both_sides_when_idle() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20));
        let actions = mgr.reconcile(&token(), &q, &config(), 0);

        let reqs = places(&actions);
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].side, OrderSide::Buy);
        assert_eq!(reqs[0].tif, TimeInForce::GoodTilCancelled);
        assert_eq!(reqs[1].price.inner(), dec!(0.52));

        // In flight: nothing more until acknowledged.
        assert!(mgr.reconcile(&token(), &q, &config(), 0).is_empty());
    }

    #[test]
    fn test_zero_size_side_not_placed() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(0), dec!(0.52), dec!(20));
        let reqs_len = places(&mgr.reconcile(&token(), &q, &config(), 0)).len();
        assert_eq!(reqs_len, 1);
    }

    #[test]
    fn test_unchanged_quote_is_left_alone() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20));
        establish(&mut mgr, &q, 0);

        // One-tick move stays within the tolerance.
        let nudged = quote(dec!(0.49), dec!(20), dec!(0.53), dec!(20));
        assert!(mgr.reconcile(&token(), &nudged, &config(), 10_000).is_empty());
    }

    #[test]
    fn test_replace_waits_for_refresh_interval() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        let moved = quote(dec!(0.45), dec!(20), dec!(0.52), dec!(20));
        assert!(mgr.reconcile(&token(), &moved, &config(), 1_999).is_empty());

        let actions = mgr.reconcile(&token(), &moved, &config(), 2_000);
        assert_eq!(
            actions,
            vec![LifecycleAction::Cancel {
                token: token().id,
                order_id: OrderId::new("o0"),
            }]
        );
        assert!(mgr.has_unacked_cancel(&token().id, OrderSide::Buy));
    }

    #[test]
    fn test_cancel_before_replace() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);
        let moved = quote(dec!(0.45), dec!(20), dec!(0.52), dec!(20));

        mgr.reconcile(&token(), &moved, &config(), 3_000);
        // No placement on the bid until the cancel is acknowledged.
        assert!(places(&mgr.reconcile(&token(), &moved, &config(), 3_100)).is_empty());

        assert!(mgr.on_cancel_acked(&token().id, &OrderId::new("o0")));
        let actions = mgr.reconcile(&token(), &moved, &config(), 3_200);
        let reqs = places(&actions);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].price.inner(), dec!(0.45));
    }

    #[test]
    fn test_suppressed_side_cancels_immediately() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        // Order is younger than the refresh interval, zero size still cancels.
        let q = quote(dec!(0.48), dec!(0), dec!(0.52), dec!(20));
        let actions = mgr.reconcile(&token(), &q, &config(), 100);
        assert!(matches!(
            actions.as_slice(),
            [LifecycleAction::Cancel { order_id, .. }] if order_id.as_str() == "o0"
        ));
    }

    #[test]
    fn test_size_drift_replaces() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        let smaller = quote(dec!(0.48), dec!(4), dec!(0.52), dec!(20));
        let actions = mgr.reconcile(&token(), &smaller, &config(), 5_000);
        assert_eq!(actions.len(), 1);

        // Within 10% is tolerated.
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);
        let close = quote(dec!(0.48), dec!(19), dec!(0.52), dec!(21));
        assert!(mgr.reconcile(&token(), &close, &config(), 5_000).is_empty());
    }

    #[test]
    fn test_unacked_cancel_is_resent() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);
        let q = quote(dec!(0.48), dec!(0), dec!(0.52), dec!(20));

        assert_eq!(mgr.reconcile(&token(), &q, &config(), 1_000).len(), 1);
        mgr.on_cancel_failed(&token().id, &OrderId::new("o0"));
        assert!(mgr.reconcile(&token(), &q, &config(), 5_999).is_empty());

        let actions = mgr.reconcile(&token(), &q, &config(), 6_000);
        assert!(matches!(
            actions.as_slice(),
            [LifecycleAction::Cancel { order_id, .. }] if order_id.as_str() == "o0"
        ));
    }

    #[test]
    fn test_rejected_side_skipped_for_tick() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(20), dec!(0.52), dec!(0));
        let actions = mgr.reconcile(&token(), &q, &config(), 1_000);
        let LifecycleAction::Place(req) = &actions[0] else {
            panic!("expected placement");
        };
        mgr.on_place_rejected(req, 1_000);

        assert!(mgr.reconcile(&token(), &q, &config(), 1_000).is_empty());
        assert_eq!(places(&mgr.reconcile(&token(), &q, &config(), 1_500)).len(), 1);
    }

    #[test]
    fn test_rate_limited_side_backs_off() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(20), dec!(0.52), dec!(0));
        let backoff = |strikes: u32| Duration::from_millis(200 * u64::from(strikes));

        let actions = mgr.reconcile(&token(), &q, &config(), 1_000);
        let LifecycleAction::Place(req) = actions[0].clone() else {
            panic!("expected placement");
        };
        assert_eq!(mgr.on_place_rate_limited(&req, 1_000, backoff), 1_200);

        // Held back past the next ticks, not just this one.
        assert!(mgr.reconcile(&token(), &q, &config(), 1_100).is_empty());
        assert!(mgr.reconcile(&token(), &q, &config(), 1_199).is_empty());

        // A second refusal doubles the hold.
        let actions = mgr.reconcile(&token(), &q, &config(), 1_200);
        let LifecycleAction::Place(req) = actions[0].clone() else {
            panic!("expected placement");
        };
        assert_eq!(mgr.on_place_rate_limited(&req, 1_200, backoff), 1_600);
        assert!(mgr.reconcile(&token(), &q, &config(), 1_500).is_empty());

        // Success clears the strikes.
        let actions = mgr.reconcile(&token(), &q, &config(), 1_600);
        let LifecycleAction::Place(req) = actions[0].clone() else {
            panic!("expected placement");
        };
        assert!(mgr.on_placed(&req, OrderId::new("o1"), 1_600).is_none());
        mgr.on_cancel_acked(&token().id, &OrderId::new("o1"));
        let actions = mgr.reconcile(&token(), &q, &config(), 1_700);
        let LifecycleAction::Place(req) = actions[0].clone() else {
            panic!("expected placement");
        };
        assert_eq!(mgr.on_place_rate_limited(&req, 1_700, backoff), 1_900);
    }

    #[test]
    fn test_placement_timeout_requires_sync() {
        let mut mgr = OrderLifecycleManager::new();
        let q = quote(dec!(0.48), dec!(20), dec!(0.52), dec!(0));
        let actions = mgr.reconcile(&token(), &q, &config(), 0);
        let LifecycleAction::Place(req) = actions[0].clone() else {
            panic!("expected placement");
        };
        mgr.on_place_timeout(&req);

        assert_eq!(
            mgr.reconcile(&token(), &q, &config(), 100),
            vec![LifecycleAction::SyncOpenOrders(token().id)]
        );

        // The order did reach the venue: adopt it, do not place again.
        let venue = vec![LiveOrder {
            order_id: OrderId::new("late"),
            token: token().id,
            side: OrderSide::Buy,
            price: Price::new(dec!(0.48)),
            remaining: Size::new(dec!(20)),
            submitted_at_ms: 0,
        }];
        assert!(mgr.sync_open_orders(&token().id, venue, 200).is_empty());
        assert_eq!(
            mgr.live_order(&token().id, OrderSide::Buy).map(|o| o.order_id.as_str()),
            Some("late")
        );
        assert!(mgr.reconcile(&token(), &q, &config(), 300).is_empty());
    }

    #[test]
    fn test_sync_drops_missing_and_cancels_orphans() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        let orphan = LiveOrder {
            order_id: OrderId::new("orphan"),
            token: token().id,
            side: OrderSide::Sell,
            price: Price::new(dec!(0.60)),
            remaining: Size::new(dec!(5)),
            submitted_at_ms: 0,
        };
        let still_there = LiveOrder {
            order_id: OrderId::new("o1"),
            remaining: Size::new(dec!(12)),
            ..orphan.clone()
        };
        let actions = mgr.sync_open_orders(&token().id, vec![still_there, orphan], 100);

        assert!(mgr.slot(&token().id, OrderSide::Buy).is_idle());
        assert_eq!(
            mgr.live_order(&token().id, OrderSide::Sell).map(|o| o.remaining.inner()),
            Some(dec!(12))
        );
        assert_eq!(
            actions,
            vec![LifecycleAction::Cancel {
                token: token().id,
                order_id: OrderId::new("orphan"),
            }]
        );
    }

    #[test]
    fn test_fills_reduce_and_free_slot() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        let fill = |size| Fill::new(
            OrderId::new("o0"),
            token().id,
            OrderSide::Buy,
            Price::new(dec!(0.48)),
            Size::new(size),
            10,
        );
        assert!(mgr.on_fill(&fill(dec!(5))));
        assert_eq!(
            mgr.live_order(&token().id, OrderSide::Buy).map(|o| o.remaining.inner()),
            Some(dec!(15))
        );
        assert!(mgr.on_fill(&fill(dec!(15))));
        assert!(mgr.slot(&token().id, OrderSide::Buy).is_idle());
        assert_eq!(mgr.resting_count(), 1);

        let unknown = Fill::new(
            OrderId::new("liq"),
            token().id,
            OrderSide::Sell,
            Price::new(dec!(0.4)),
            Size::ONE,
            10,
        );
        assert!(!mgr.on_fill(&unknown));
    }

    #[test]
    fn test_liquidation_waits_for_reducing_side() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);

        let liq = OrderRequest::liquidation(
            token().id,
            OrderSide::Sell,
            Price::new(dec!(0.46)),
            Size::new(dec!(30)),
        );
        mgr.submit_liquidation(liq.clone());
        let empty = quote(dec!(0.48), dec!(0), dec!(0.52), dec!(0));

        // First pass cancels both passive orders; the sell side is busy.
        let actions = mgr.reconcile(&token(), &empty, &config(), 100);
        assert_eq!(actions.len(), 2);
        assert!(places(&actions).is_empty());

        mgr.on_cancel_acked(&token().id, &OrderId::new("o1"));
        let actions = mgr.reconcile(&token(), &empty, &config(), 100);
        assert_eq!(actions, vec![LifecycleAction::Place(liq.clone())]);
        assert!(mgr.pending_liquidation(&token().id).is_none());

        // In flight until acknowledged.
        mgr.submit_liquidation(liq.clone());
        assert!(mgr.reconcile(&token(), &empty, &config(), 200).is_empty());
        assert!(mgr.on_placed(&liq, OrderId::new("liq"), 200).is_none());
        assert_eq!(places(&mgr.reconcile(&token(), &empty, &config(), 200)).len(), 1);
    }

    #[test]
    fn test_killed_fill_or_kill_falls_back_to_fill_and_kill() {
        let mut mgr = OrderLifecycleManager::new();
        let fok = OrderRequest::liquidation(
            token().id,
            OrderSide::Sell,
            Price::new(dec!(0.46)),
            Size::new(dec!(30)),
        )
        .with_tif(TimeInForce::FillOrKill);
        mgr.submit_liquidation(fok.clone());
        let empty = quote(dec!(0.48), dec!(0), dec!(0.52), dec!(0));
        assert_eq!(
            mgr.reconcile(&token(), &empty, &config(), 100),
            vec![LifecycleAction::Place(fok.clone())]
        );

        let fallback = mgr.on_place_rejected(&fok, 100);
        let Some(LifecycleAction::Place(fak)) = fallback else {
            panic!("expected fill-and-kill fallback");
        };
        assert_eq!(fak.tif, TimeInForce::FillAndKill);
        assert_eq!(fak.price, fok.price);
        assert_eq!(fak.size, fok.size);

        // The fallback occupies the exit slot; a killed FAK is final.
        mgr.submit_liquidation(fok.clone());
        assert!(mgr.reconcile(&token(), &empty, &config(), 100).is_empty());
        assert!(mgr.on_place_rejected(&fak, 100).is_none());
        assert_eq!(places(&mgr.reconcile(&token(), &empty, &config(), 200)).len(), 1);
    }

    #[test]
    fn test_cancel_all() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);
        mgr.submit_liquidation(OrderRequest::liquidation(
            token().id,
            OrderSide::Sell,
            Price::new(dec!(0.4)),
            Size::ONE,
        ));

        let actions = mgr.cancel_all(&token().id, 50);
        assert_eq!(actions.len(), 2);
        assert!(mgr.pending_liquidation(&token().id).is_none());
        assert!(mgr.has_unacked_cancel(&token().id, OrderSide::Buy));
        assert!(mgr.cancel_all(&TokenId::new("other"), 50).is_empty());
    }

    #[test]
    fn test_duplicate_placement_is_canceled() {
        let mut mgr = OrderLifecycleManager::new();
        establish(&mut mgr, &quote(dec!(0.48), dec!(20), dec!(0.52), dec!(20)), 0);
        let dup = OrderRequest::passive(
            token().id,
            OrderSide::Buy,
            Price::new(dec!(0.48)),
            Size::new(dec!(20)),
        );
        assert_eq!(
            mgr.on_placed(&dup, OrderId::new("dup"), 10),
            Some(LifecycleAction::Cancel {
                token: token().id,
                order_id: OrderId::new("dup"),
            })
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Quote { bid_ticks: i64, size: i64 },
        AckFirstCancel,
        FailFirstCancel,
        Advance(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (30i64..50, 0i64..3).prop_map(|(bid_ticks, size)| Op::Quote { bid_ticks, size }),
            Just(Op::AckFirstCancel),
            Just(Op::FailFirstCancel),
            (0u64..6_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_placement_while_cancel_unacked(ops in proptest::collection::vec(op(), 1..60)) {
            let mut mgr = OrderLifecycleManager::new();
            let cfg = config();
            let mut now = 0u64;
            let mut next_id = 0u32;
            let mut outstanding: Vec<(OrderSide, OrderId)> = Vec::new();

            for op in ops {
                match op {
                    Op::Quote { bid_ticks, size } => {
                        let bid = Decimal::new(bid_ticks, 2);
                        let size = Decimal::from(size * 10);
                        let q = quote(bid, size, bid + dec!(0.05), size);
                        for action in mgr.reconcile(&token(), &q, &cfg, now) {
                            match action {
                                LifecycleAction::Place(req) => {
                                    prop_assert!(
                                        !outstanding.iter().any(|(s, _)| *s == req.side),
                                        "placement on {} with unacked cancel", req.side
                                    );
                                    next_id += 1;
                                    mgr.on_placed(&req, OrderId::new(format!("o{next_id}")), now);
                                }
                                LifecycleAction::Cancel { order_id, .. } => {
                                    let side = [OrderSide::Buy, OrderSide::Sell]
                                        .into_iter()
                                        .find(|s| mgr.slot(&token().id, *s).order_id() == Some(&order_id));
                                    if let Some(side) = side {
                                        if !outstanding.iter().any(|(_, id)| *id == order_id) {
                                            outstanding.push((side, order_id));
                                        }
                                    }
                                }
                                LifecycleAction::SyncOpenOrders(_) => {}
                            }
                        }
                    }
                    Op::AckFirstCancel => {
                        if !outstanding.is_empty() {
                            let (_, id) = outstanding.remove(0);
                            mgr.on_cancel_acked(&token().id, &id);
                        }
                    }
                    Op::FailFirstCancel => {
                        if let Some((_, id)) = outstanding.first() {
                            mgr.on_cancel_failed(&token().id, id);
                        }
                    }
                    Op::Advance(ms) => now += ms,
                }
            }
        }
    }
}
