//! Scriptable in-memory gateway for tests.
//!
//! Records every call in order, keeps a resting-order book per token, and
//! lets tests inject fills, rejections and slow responses.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pmm_core::{
    BookSnapshot, Fill, LiveOrder, Market, OrderId, OrderRequest, OrderSide, Price, Size, TokenId,
};
use rust_decimal::Decimal;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, MarketDiscovery, OrderGateway};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    GetBook(TokenId),
    Place(OrderRequest),
    Cancel(OrderId),
    PollFills,
    OpenOrders(TokenId),
    Position(TokenId),
}

/// Mock gateway for testing.
#[derive(Debug, Default)]
pub struct MockGateway {
    books: Mutex<HashMap<TokenId, BookSnapshot>>,
    /// Resting (GTC) orders in placement order.
    resting: Mutex<Vec<LiveOrder>>,
    /// Immediate-or-kill orders, kept so tests can fill them after the fact.
    immediate: Mutex<HashMap<OrderId, LiveOrder>>,
    fills: Mutex<VecDeque<Fill>>,
    /// Signed holdings per token, moved by every fill.
    positions: Mutex<HashMap<TokenId, Decimal>>,
    calls: Mutex<Vec<GatewayCall>>,
    place_errors: Mutex<VecDeque<GatewayError>>,
    cancel_errors: Mutex<VecDeque<GatewayError>>,
    place_delay: Mutex<Option<Duration>>,
    markets: Mutex<Vec<Market>>,
    next_id: AtomicU64,
    now_ms: AtomicU64,
    unavailable: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock used to stamp placed orders.
    pub fn set_now_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Set the book returned for a token.
    pub fn set_book(&self, token: &TokenId, bid: Option<Price>, ask: Option<Price>, ts_ms: u64) {
        self.books
            .lock()
            .insert(token.clone(), BookSnapshot::new(token.clone(), bid, ask, ts_ms));
    }

    /// Markets returned by discovery.
    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.lock() = markets;
    }

    /// Queue an arbitrary fill for the next `poll_fills`.
    pub fn push_fill(&self, fill: Fill) {
        self.book_position(&fill);
        self.fills.lock().push_back(fill);
    }

    /// Override the holdings reported by `position`.
    pub fn set_position(&self, token: &TokenId, size: Decimal) {
        self.positions.lock().insert(token.clone(), size);
    }

    /// Discard queued fills as if a `poll_fills` response was lost. Holdings
    /// keep the fills.
    pub fn drop_pending_fills(&self) -> usize {
        let mut fills = self.fills.lock();
        let dropped = fills.len();
        fills.clear();
        dropped
    }

    /// Fill part or all of a placed order at its limit price.
    ///
    /// Returns the queued fill, or None if the order is unknown.
    pub fn fill_order(&self, order_id: &OrderId, size: Size, ts_ms: u64) -> Option<Fill> {
        let fill = {
            let mut resting = self.resting.lock();
            if let Some(pos) = resting.iter().position(|o| &o.order_id == order_id) {
                let order = &mut resting[pos];
                let fill = Fill::new(
                    order.order_id.clone(),
                    order.token.clone(),
                    order.side,
                    order.price,
                    size,
                    ts_ms,
                );
                if order.apply_fill(size) {
                    resting.remove(pos);
                }
                Some(fill)
            } else {
                let mut immediate = self.immediate.lock();
                immediate.remove(order_id).map(|order| {
                    Fill::new(
                        order.order_id.clone(),
                        order.token.clone(),
                        order.side,
                        order.price,
                        size.min(order.remaining),
                        ts_ms,
                    )
                })
            }
        }?;
        self.book_position(&fill);
        self.fills.lock().push_back(fill.clone());
        Some(fill)
    }

    /// Next placement fails with this error.
    pub fn fail_next_place(&self, error: GatewayError) {
        self.place_errors.lock().push_back(error);
    }

    /// Next cancel fails with this error.
    pub fn fail_next_cancel(&self, error: GatewayError) {
        self.cancel_errors.lock().push_back(error);
    }

    /// Placements are accepted by the venue but respond only after `delay`.
    pub fn set_place_delay(&self, delay: Option<Duration>) {
        *self.place_delay.lock() = delay;
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Recorded calls, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Every placement request seen.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Place(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every cancel request seen.
    pub fn canceled(&self) -> Vec<OrderId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Cancel(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current resting orders across all tokens.
    pub fn resting_orders(&self) -> Vec<LiveOrder> {
        self.resting.lock().clone()
    }

    fn book_position(&self, fill: &Fill) {
        let signed = match fill.side {
            OrderSide::Buy => fill.size.inner(),
            OrderSide::Sell => -fill.size.inner(),
        };
        *self
            .positions
            .lock()
            .entry(fill.token.clone())
            .or_insert(Decimal::ZERO) += signed;
    }

    fn record(&self, call: GatewayCall) -> GatewayResult<()> {
        self.calls.lock().push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock offline".to_string()));
        }
        Ok(())
    }

    fn accept(&self, request: &OrderRequest) -> OrderId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = OrderId::new(format!("mock-{n}"));
        let order = LiveOrder {
            order_id: order_id.clone(),
            token: request.token.clone(),
            side: request.side,
            price: request.price,
            remaining: request.size,
            submitted_at_ms: self.now_ms.load(Ordering::SeqCst),
        };
        if request.tif.is_immediate() {
            self.immediate.lock().insert(order_id.clone(), order);
        } else {
            self.resting.lock().push(order);
        }
        order_id
    }
}

impl OrderGateway for MockGateway {
    fn get_book(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<BookSnapshot>> {
        Box::pin(async move {
            self.record(GatewayCall::GetBook(token.clone()))?;
            self.books
                .lock()
                .get(&token)
                .cloned()
                .ok_or_else(|| GatewayError::Unavailable(format!("no book for {token}")))
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderId>> {
        Box::pin(async move {
            self.record(GatewayCall::Place(request.clone()))?;
            if let Some(err) = self.place_errors.lock().pop_front() {
                return Err(err);
            }
            let order_id = self.accept(&request);
            let delay = *self.place_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(order_id)
        })
    }

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async move {
            self.record(GatewayCall::Cancel(order_id.clone()))?;
            if let Some(err) = self.cancel_errors.lock().pop_front() {
                return Err(err);
            }
            let mut resting = self.resting.lock();
            match resting.iter().position(|o| o.order_id == order_id) {
                Some(pos) => {
                    resting.remove(pos);
                    Ok(())
                }
                None => Err(GatewayError::OrderNotFound(order_id.to_string())),
            }
        })
    }

    fn poll_fills(&self) -> BoxFuture<'_, GatewayResult<Vec<Fill>>> {
        Box::pin(async move {
            self.record(GatewayCall::PollFills)?;
            Ok(self.fills.lock().drain(..).collect())
        })
    }

    fn open_orders(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Vec<LiveOrder>>> {
        Box::pin(async move {
            self.record(GatewayCall::OpenOrders(token.clone()))?;
            Ok(self
                .resting
                .lock()
                .iter()
                .filter(|o| o.token == token)
                .cloned()
                .collect())
        })
    }

    fn position(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Decimal>> {
        Box::pin(async move {
            self.record(GatewayCall::Position(token.clone()))?;
            Ok(self
                .positions
                .lock()
                .get(&token)
                .copied()
                .unwrap_or(Decimal::ZERO))
        })
    }
}

impl MarketDiscovery for MockGateway {
    fn list_tradable_markets(&self) -> BoxFuture<'_, GatewayResult<Vec<Market>>> {
        Box::pin(async move { Ok(self.markets.lock().clone()) })
    }
}
