//! Gateway and discovery traits.
//!
//! Methods return boxed futures so the traits stay dyn-compatible and can be
//! shared as `Arc<dyn OrderGateway>` across market tasks.

use std::pin::Pin;
use std::sync::Arc;

use pmm_core::{BookSnapshot, Fill, LiveOrder, Market, OrderId, OrderRequest, TokenId};
use rust_decimal::Decimal;

use crate::error::GatewayResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Typed contract with the exchange.
///
/// Every response is decoded at this boundary; the core never sees raw
/// payloads. Implementations must be safe to share between market loops.
pub trait OrderGateway: Send + Sync {
    /// Top of book for a token.
    fn get_book(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<BookSnapshot>>;

    /// Submit an order. Returns the venue order id.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderId>>;

    /// Cancel an order. Canceling an order the venue no longer knows yields
    /// `GatewayError::OrderNotFound`, which callers treat as an ack.
    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, GatewayResult<()>>;

    /// Fills since the previous call, in venue order.
    fn poll_fills(&self) -> BoxFuture<'_, GatewayResult<Vec<Fill>>>;

    /// Resting orders for a token. Used to rebuild state after timeouts and
    /// reconnects.
    fn open_orders(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Vec<LiveOrder>>>;

    /// Signed size the venue holds for a token (positive = long). The
    /// ledger is restated to this figure on loop start and after outages.
    /// `GatewayError::Unsupported` means the venue offers no such view.
    fn position(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Decimal>>;
}

/// Source of tradable markets. Refreshed periodically, off the quoting path.
pub trait MarketDiscovery: Send + Sync {
    fn list_tradable_markets(&self) -> BoxFuture<'_, GatewayResult<Vec<Market>>>;
}

/// Arc wrapper for OrderGateway trait objects.
pub type DynGateway = Arc<dyn OrderGateway>;

/// Arc wrapper for MarketDiscovery trait objects.
pub type DynDiscovery = Arc<dyn MarketDiscovery>;
