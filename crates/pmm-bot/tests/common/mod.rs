//! Shared fixtures for the market loop scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use pmm_bot::{FillRouter, LoopContext, MarketLoop};
use pmm_core::{
    Fill, Market, MarketId, OrderRequest, OrderSide, Price, RiskConfig, Size, TokenId,
};
use pmm_gateway::{CallPolicy, DynGateway, GatewayConfig, MockGateway};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

pub const YES: &str = "yes-token";
pub const NO: &str = "no-token";

pub fn yes() -> TokenId {
    TokenId::new(YES)
}

pub fn no() -> TokenId {
    TokenId::new(NO)
}

pub fn market(tick: Decimal) -> Market {
    Market {
        id: MarketId::new("0xmarket"),
        question: "Will it rain?".to_string(),
        yes_token: yes(),
        no_token: no(),
        tick_size: Price::new(tick),
        min_order_size: Size::new(dec!(5)),
        active: true,
    }
}

pub fn policy() -> CallPolicy {
    CallPolicy::from(&GatewayConfig {
        timeout_ms: 100,
        max_attempts: 1,
        backoff_base_ms: 1,
        backoff_max_ms: 1,
    })
}

/// A market loop wired to a `MockGateway`, with fills routed through a
/// `FillRouter` exactly as the application does.
pub struct Harness {
    pub mock: Arc<MockGateway>,
    pub gateway: DynGateway,
    pub ctx: LoopContext,
    pub router: FillRouter,
    pub config_tx: watch::Sender<Arc<RiskConfig>>,
    pub market_loop: MarketLoop,
    books: HashMap<TokenId, (Option<Price>, Option<Price>)>,
}

impl Harness {
    pub fn new(tick: Decimal, config: RiskConfig) -> Self {
        let mock = Arc::new(MockGateway::new());
        let gateway: DynGateway = mock.clone();
        Self::with_gateway(tick, config, mock, gateway)
    }

    /// Use `gateway` for the loop while keeping `mock` for scripting.
    pub fn with_gateway(
        tick: Decimal,
        config: RiskConfig,
        mock: Arc<MockGateway>,
        gateway: DynGateway,
    ) -> Self {
        Self::build(tick, config, mock, gateway, policy())
    }

    /// Mock gateway behind a custom call policy.
    pub fn with_policy(tick: Decimal, config: RiskConfig, policy: CallPolicy) -> Self {
        let mock = Arc::new(MockGateway::new());
        let gateway: DynGateway = mock.clone();
        Self::build(tick, config, mock, gateway, policy)
    }

    fn build(
        tick: Decimal,
        config: RiskConfig,
        mock: Arc<MockGateway>,
        gateway: DynGateway,
        policy: CallPolicy,
    ) -> Self {
        let ctx = LoopContext::new(gateway.clone(), policy);
        let router = FillRouter::new();
        let (fill_tx, fill_rx) = mpsc::channel(64);
        router.register(&yes(), fill_tx.clone());
        router.register(&no(), fill_tx);

        let (config_tx, config_rx) = watch::channel(Arc::new(config));
        let market_loop = MarketLoop::new(market(tick), ctx.clone(), fill_rx, config_rx);

        Self {
            mock,
            gateway,
            ctx,
            router,
            config_tx,
            market_loop,
            books: HashMap::new(),
        }
    }

    /// Set the top of book for a token. Re-stamped at every `tick`.
    pub fn set_book(&mut self, token: TokenId, bid: Decimal, ask: Decimal) {
        self.books
            .insert(token, (Some(Price::new(bid)), Some(Price::new(ask))));
    }

    pub fn set_both_books(&mut self, bid: Decimal, ask: Decimal) {
        self.set_book(yes(), bid, ask);
        self.set_book(no(), bid, ask);
    }

    /// Refresh books at `now_ms`, route pending fills, then tick.
    pub async fn tick(&mut self, now_ms: u64) {
        for (token, (bid, ask)) in &self.books {
            self.mock.set_book(token, *bid, *ask, now_ms);
        }
        self.tick_without_book_refresh(now_ms).await;
    }

    pub async fn tick_without_book_refresh(&mut self, now_ms: u64) {
        self.mock.set_now_ms(now_ms);
        self.router
            .poll_once(&self.gateway, &self.ctx.policy)
            .await
            .ok();
        self.market_loop.tick(now_ms).await;
    }

    /// Fill the live order on a side completely.
    pub fn fill_live(&self, token: &TokenId, side: OrderSide, now_ms: u64) -> Fill {
        let order = self
            .market_loop
            .orders()
            .live_order(token, side)
            .cloned()
            .expect("live order");
        self.mock
            .fill_order(&order.order_id, order.remaining, now_ms)
            .expect("mock fill")
    }

    pub fn placed_for(&self, token: &TokenId) -> Vec<OrderRequest> {
        self.mock
            .placed()
            .into_iter()
            .filter(|r| &r.token == token)
            .collect()
    }

    pub fn resting_on(&self, token: &TokenId, side: OrderSide) -> usize {
        self.mock
            .resting_orders()
            .iter()
            .filter(|o| &o.token == token && o.side == side)
            .count()
    }

    pub fn position_size(&self, token: &TokenId) -> Decimal {
        self.market_loop.position(token).size
    }
}

pub fn price(p: Decimal) -> Price {
    Price::new(p)
}

pub fn size(s: Decimal) -> Size {
    Size::new(s)
}
