//! Per-market control loop.
//!
//! One loop owns both outcome tokens of a market: their ledger entries, exit
//! state machines and order slots. Nothing else writes that state.
//!
//! Each tick:
//!
//! ```text
//! drain fills → (venue position sync) → cap invariant
//!   → per token: book → quote → limits → budget → exit evaluation
//!                → exit override → reconcile ⇄ execute → publish
//! ```
//!
//! Venue positions are read on loop start and after the gateway recovers
//! from an outage; drift from the ledger is booked and logged.
//!
//! Only gateway calls suspend. Everything between them is synchronous.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use pmm_core::{
    BookSnapshot, Fill, Market, OrderId, OrderRequest, OrderSide, Price, Quote, RiskConfig, Size,
    TokenId, TradableToken,
};
use pmm_gateway::{CallPolicy, DynGateway, GatewayError};
use pmm_mm::{LifecycleAction, OrderLifecycleManager, QuoteEngine};
use pmm_position::{
    ExitAction, ExitScheduler, ExitState, ForcedExitReason, Position, PositionLedger,
    PositionReport,
};
use pmm_risk::{HaltReason, RiskBudget, RiskController, RiskError, TokenHaltLatch};
use pmm_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Reconcile/execute rounds per token and tick. A cancel acknowledged in
/// round one lets its replacement go out in round two.
const MAX_RECONCILE_PASSES: usize = 3;

/// Shared handles every market loop receives.
#[derive(Clone)]
pub struct LoopContext {
    pub gateway: DynGateway,
    pub policy: CallPolicy,
    /// Process-wide notional budget.
    pub budget: Arc<RiskBudget>,
    pub halts: Arc<TokenHaltLatch>,
    /// Latest position snapshot per token, read by the inventory report.
    pub reports: Arc<DashMap<TokenId, PositionReport>>,
}

impl LoopContext {
    #[must_use]
    pub fn new(gateway: DynGateway, policy: CallPolicy) -> Self {
        Self {
            gateway,
            policy,
            budget: Arc::new(RiskBudget::new()),
            halts: Arc::new(TokenHaltLatch::new()),
            reports: Arc::new(DashMap::new()),
        }
    }
}

/// Ledger and exit state a stopped loop leaves behind. Handing it to the
/// next loop for the market keeps positions and their age clocks.
#[derive(Debug, Default)]
pub struct ParkedInventory {
    pub ledger: PositionLedger,
    pub exits: ExitScheduler,
}

impl ParkedInventory {
    /// Tokens still holding a position.
    #[must_use]
    pub fn holding(&self) -> Vec<Position> {
        self.ledger
            .iter()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect()
    }
}

/// Control loop for one market.
pub struct MarketLoop {
    market: Market,
    tokens: [TradableToken; 2],
    ctx: LoopContext,
    fills: mpsc::Receiver<Fill>,
    config_rx: watch::Receiver<Arc<RiskConfig>>,
    ledger: PositionLedger,
    exits: ExitScheduler,
    orders: OrderLifecycleManager,
    engine: QuoteEngine,
    risk: RiskController,
    /// Set after a transient gateway failure; open orders are resynced once
    /// the gateway answers again.
    resync_pending: bool,
    /// Tokens whose ledger size has not been checked against the venue.
    unsynced: HashSet<TokenId>,
    /// Venue size seen differing from the ledger, awaiting confirmation.
    drift_seen: HashMap<TokenId, Decimal>,
}

impl MarketLoop {
    pub fn new(
        market: Market,
        ctx: LoopContext,
        fills: mpsc::Receiver<Fill>,
        config_rx: watch::Receiver<Arc<RiskConfig>>,
    ) -> Self {
        let tokens = market.tokens();
        let mut ledger = PositionLedger::new();
        for token in &tokens {
            ledger.ensure(&token.id);
        }
        let unsynced = tokens.iter().map(|t| t.id.clone()).collect();
        Self {
            market,
            tokens,
            ctx,
            fills,
            config_rx,
            ledger,
            exits: ExitScheduler::new(),
            orders: OrderLifecycleManager::new(),
            engine: QuoteEngine::new(),
            risk: RiskController::new(),
            resync_pending: false,
            unsynced,
            drift_seen: HashMap::new(),
        }
    }

    /// Continue from the state a previous loop for this market left.
    #[must_use]
    pub fn resume(mut self, parked: ParkedInventory) -> Self {
        self.ledger = parked.ledger;
        self.exits = parked.exits;
        for token in &self.tokens {
            self.ledger.ensure(&token.id);
        }
        self
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one tick at `now_ms`.
    pub async fn tick(&mut self, now_ms: u64) {
        let config: Arc<RiskConfig> = self.config_rx.borrow_and_update().clone();

        let mut moved = self.drain_fills();
        if !self.unsynced.is_empty() {
            for (token, before) in self.sync_positions(now_ms).await {
                moved.entry(token).or_insert(before);
            }
        }
        self.check_invariants(&config, now_ms, &moved);

        for token in self.tokens.clone() {
            self.tick_token(&token, &config, now_ms).await;
        }
    }

    async fn tick_token(&mut self, token: &TradableToken, config: &RiskConfig, now_ms: u64) {
        let book = self.fetch_book(token).await;
        let fresh = book
            .as_ref()
            .filter(|b| b.is_fresh(now_ms, config.max_book_age_ms));
        let position = self.ledger.position_of(&token.id);

        let (target, quoted) =
            match self
                .engine
                .compute_quote(token, book.as_ref(), position.size, config, now_ms)
            {
                Ok(quote) => {
                    Metrics::quote_computed(token.id.as_str());
                    (quote, true)
                }
                Err(reason) => {
                    Metrics::quote_suppressed(token.id.as_str(), reason.label());
                    debug!(token = %token.id.short(), reason = %reason, "No quote this tick");
                    (empty_quote(&token.id), false)
                }
            };

        // Anchor for a walk starting this tick: where the reducing side would rest.
        let passive_exit = OrderSide::reducing(position.size)
            .filter(|_| quoted)
            .map(|side| target.price(side));

        let limited = self
            .risk
            .apply_limits(token, target, position.size, config);
        let budgeted = self
            .ctx
            .budget
            .apply(limited, position.size, config.global_max_notional);

        let decision = self
            .exits
            .evaluate(token, &position, fresh, passive_exit, config, now_ms);
        if let Some((from, to)) = decision.transition {
            Metrics::exit_transition(&from.to_string(), &to.to_string());
        }

        let mut desired = decision.action.apply(budgeted);
        if self.ctx.halts.is_halted(&token.id) {
            desired.set_size(OrderSide::Buy, Size::ZERO);
            desired.set_size(OrderSide::Sell, Size::ZERO);
        }

        match &decision.action {
            ExitAction::Liquidate { order: Some(order) } => {
                let reason = self
                    .exits
                    .reason_of(&token.id)
                    .map_or("unknown", |r| r.label());
                warn!(
                    token = %token.id.short(),
                    side = %order.side,
                    price = %order.price,
                    size = %order.size,
                    reason,
                    "Liquidating position"
                );
                Metrics::liquidation(token.id.as_str(), reason);
                self.orders.submit_liquidation(order.clone());
            }
            ExitAction::Liquidate { order: None } => {}
            ExitAction::Passive | ExitAction::Walk { .. } => {
                self.orders.cancel_liquidation(&token.id);
            }
        }

        for _ in 0..MAX_RECONCILE_PASSES {
            let actions = self.orders.reconcile(token, &desired, config, now_ms);
            if actions.is_empty() {
                break;
            }
            self.execute(actions, now_ms).await;
        }

        self.publish(token, &position, fresh);
    }

    // ========================================================================
    // Fills and invariants
    // ========================================================================

    /// Apply queued fills. Returns the tokens whose position moved, with
    /// their exposure before the first fill.
    fn drain_fills(&mut self) -> HashMap<TokenId, Decimal> {
        let mut moved = HashMap::new();
        while let Ok(fill) = self.fills.try_recv() {
            let before = self.ledger.size_of(&fill.token).abs();
            if self.apply_fill(&fill) {
                moved.entry(fill.token.clone()).or_insert(before);
            }
        }
        for token in &self.tokens {
            let notional = self.ledger.position_of(&token.id).notional();
            self.ctx.budget.update(&token.id, notional);
        }
        moved
    }

    fn apply_fill(&mut self, fill: &Fill) -> bool {
        if !self.tokens.iter().any(|t| t.id == fill.token) {
            warn!(
                market = %self.market.id,
                token = %fill.token.short(),
                "Fill for a token outside this market, ignoring"
            );
            return false;
        }

        let position = match self.ledger.apply_fill(
            &fill.token,
            fill.side,
            fill.price,
            fill.size,
            fill.timestamp_ms,
        ) {
            Ok(position) => position.clone(),
            Err(e) => {
                warn!(token = %fill.token.short(), error = %e, "Fill rejected by ledger");
                return false;
            }
        };

        if !self.orders.on_fill(fill) {
            debug!(
                token = %fill.token.short(),
                order_id = %fill.order_id,
                "Fill for untracked order (liquidation or adopted)"
            );
        }

        info!(
            token = %fill.token.short(),
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            position = %position.size,
            avg_price = %position.avg_price,
            "Position updated"
        );
        Metrics::fill(
            fill.token.as_str(),
            &fill.side.to_string(),
            fill.size.inner().to_f64().unwrap_or(0.0),
        );
        true
    }

    /// Halt quoting and force an exit on any token that `moved` past the cap
    /// this tick. `moved` maps each token to its exposure before the move.
    ///
    /// A position left above a cap that was lowered by a reload is not a
    /// breach: the limits already stop it from growing and it exits on its
    /// normal schedule.
    fn check_invariants(
        &mut self,
        config: &RiskConfig,
        now_ms: u64,
        moved: &HashMap<TokenId, Decimal>,
    ) {
        for token in &self.tokens {
            let position = self.ledger.position_of(&token.id);
            let Err(RiskError::CapBreached { size, cap, .. }) =
                self.risk.check_invariant(&token.id, position.size, config)
            else {
                continue;
            };
            let grew = moved
                .get(&token.id)
                .map_or(false, |before| size.abs() > *before);
            if !grew {
                debug!(
                    token = %token.id.short(),
                    size = %size,
                    cap = %cap,
                    "Position above a lowered cap, accumulation suppressed"
                );
                continue;
            }

            if self
                .ctx
                .halts
                .halt(&token.id, HaltReason::CapBreach { size, cap }, now_ms)
            {
                error!(
                    market = %self.market.id,
                    token = %token.id.short(),
                    size = %size,
                    cap = %cap,
                    "Position cap breached, quoting halted"
                );
                Metrics::token_halted(token.id.as_str(), true);
            }
            self.exits
                .force(&token.id, &position, ForcedExitReason::InvariantBreach { size });
        }
    }

    // ========================================================================
    // Venue position sync
    // ========================================================================

    /// Compare ledger sizes with the venue for unsynced tokens and book any
    /// drift. Returns the restated tokens with their exposure before.
    ///
    /// A drift is booked only when the same venue size is seen on two
    /// consecutive syncs, so fills still in the router are not counted twice.
    /// Tokens stay unsynced while the venue cannot be read or no price is
    /// known to book the drift at. A venue without a position view marks
    /// them synced.
    async fn sync_positions(&mut self, now_ms: u64) -> HashMap<TokenId, Decimal> {
        let mut restated = HashMap::new();
        for token in self.tokens.clone() {
            if !self.unsynced.contains(&token.id) {
                continue;
            }
            let gateway = &self.ctx.gateway;
            let result = self
                .ctx
                .policy
                .call("position", || gateway.position(token.id.clone()))
                .await;
            let venue = match result {
                Ok(size) => size,
                Err(GatewayError::Unsupported(reason)) => {
                    debug!(
                        token = %token.id.short(),
                        reason = %reason,
                        "No venue position view"
                    );
                    self.unsynced.remove(&token.id);
                    continue;
                }
                Err(e) => {
                    Metrics::gateway_error("position", e.kind());
                    warn!(token = %token.id.short(), error = %e, "Position query failed");
                    continue;
                }
            };

            let ledger = self.ledger.position_of(&token.id);
            if venue == ledger.size {
                self.drift_seen.remove(&token.id);
                self.unsynced.remove(&token.id);
                continue;
            }
            if self.drift_seen.insert(token.id.clone(), venue) != Some(venue) {
                debug!(
                    token = %token.id.short(),
                    venue = %venue,
                    ledger = %ledger.size,
                    "Ledger differs from venue, confirming on the next sync"
                );
                continue;
            }
            let Some(price) = self.drift_price(&token, &ledger).await else {
                warn!(
                    token = %token.id.short(),
                    venue = %venue,
                    ledger = %ledger.size,
                    "Ledger differs from venue but no price to book it at"
                );
                continue;
            };

            match self.ledger.restate(&token.id, venue, price, now_ms) {
                Ok(drift) => {
                    warn!(
                        market = %self.market.id,
                        token = %token.id.short(),
                        ledger = %ledger.size,
                        venue = %venue,
                        drift = %drift,
                        price = %price,
                        "Ledger drifted from venue position, restated"
                    );
                    Metrics::ledger_drift(token.id.as_str());
                    let notional = self.ledger.position_of(&token.id).notional();
                    self.ctx.budget.update(&token.id, notional);
                    self.drift_seen.remove(&token.id);
                    self.unsynced.remove(&token.id);
                    restated.entry(token.id.clone()).or_insert(ledger.size.abs());
                }
                Err(e) => {
                    warn!(token = %token.id.short(), error = %e, "Ledger restate failed");
                }
            }
        }
        restated
    }

    /// Price for booking a drift: book mid, else the position's entry price.
    async fn drift_price(&self, token: &TradableToken, ledger: &Position) -> Option<Price> {
        let gateway = &self.ctx.gateway;
        let book = self
            .ctx
            .policy
            .call("get_book", || gateway.get_book(token.id.clone()))
            .await
            .ok();
        book.as_ref()
            .and_then(BookSnapshot::mid)
            .or_else(|| (!ledger.avg_price.is_zero()).then(|| Price::new(ledger.avg_price)))
    }

    // ========================================================================
    // Gateway execution
    // ========================================================================

    async fn fetch_book(&mut self, token: &TradableToken) -> Option<BookSnapshot> {
        let started = Instant::now();
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .policy
            .call("get_book", || gateway.get_book(token.id.clone()))
            .await;
        Metrics::gateway_latency("get_book", elapsed_ms(started));

        match result {
            Ok(book) => {
                if self.resync_pending {
                    info!(
                        market = %self.market.id,
                        "Gateway reachable again, resyncing orders and positions"
                    );
                    for t in &self.tokens {
                        self.orders.request_sync(&t.id);
                        self.unsynced.insert(t.id.clone());
                    }
                    self.resync_pending = false;
                }
                Some(book)
            }
            Err(e) => {
                Metrics::gateway_error("get_book", e.kind());
                warn!(token = %token.id.short(), error = %e, "Book unavailable");
                if e.is_transient() {
                    self.resync_pending = true;
                }
                None
            }
        }
    }

    /// Execute lifecycle actions in order, feeding outcomes back. Follow-up
    /// actions (duplicate cancels, orphan cancels) run in the same call.
    async fn execute(&mut self, actions: Vec<LifecycleAction>, now_ms: u64) {
        let mut queue: VecDeque<LifecycleAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                LifecycleAction::Place(request) => {
                    if let Some(follow_up) = self.execute_place(request, now_ms).await {
                        queue.push_back(follow_up);
                    }
                }
                LifecycleAction::Cancel { token, order_id } => {
                    self.execute_cancel(&token, order_id).await;
                }
                LifecycleAction::SyncOpenOrders(token) => {
                    queue.extend(self.execute_sync(&token, now_ms).await);
                }
            }
        }
    }

    /// Placements are never retried here: a timeout leaves the outcome
    /// unknown and is resolved by the open-orders resync.
    async fn execute_place(
        &mut self,
        request: OrderRequest,
        now_ms: u64,
    ) -> Option<LifecycleAction> {
        let started = Instant::now();
        let result = self
            .ctx
            .policy
            .timed(self.ctx.gateway.place_order(request.clone()))
            .await;
        Metrics::gateway_latency("place", elapsed_ms(started));

        let side = request.side.to_string();
        match result {
            Ok(order_id) => {
                let kind = if request.tif.is_immediate() {
                    "liquidation"
                } else {
                    "passive"
                };
                info!(
                    token = %request.token.short(),
                    side = %request.side,
                    price = %request.price,
                    size = %request.size,
                    order_id = %order_id,
                    kind,
                    "Order placed"
                );
                Metrics::order_placed(request.token.as_str(), &side, kind);
                self.orders.on_placed(&request, order_id, now_ms)
            }
            Err(e @ (GatewayError::Timeout(_) | GatewayError::Unavailable(_))) => {
                Metrics::gateway_error("place", e.kind());
                warn!(
                    token = %request.token.short(),
                    side = %request.side,
                    error = %e,
                    "Placement outcome unknown"
                );
                self.orders.on_place_timeout(&request);
                None
            }
            Err(e @ GatewayError::RateLimited(_)) => {
                Metrics::gateway_error("place", e.kind());
                let policy = self.ctx.policy;
                let until = self.orders.on_place_rate_limited(&request, now_ms, |strikes| {
                    policy.backoff_delay(strikes)
                });
                warn!(
                    token = %request.token.short(),
                    side = %request.side,
                    error = %e,
                    held_ms = until.saturating_sub(now_ms),
                    "Placement rate limited, side held back"
                );
                None
            }
            Err(e) => {
                Metrics::gateway_error("place", e.kind());
                if matches!(e, GatewayError::Rejected { .. }) {
                    Metrics::order_rejected(request.token.as_str(), &side);
                }
                warn!(
                    token = %request.token.short(),
                    side = %request.side,
                    price = %request.price,
                    size = %request.size,
                    tif = %request.tif,
                    error = %e,
                    "Placement rejected"
                );
                self.orders.on_place_rejected(&request, now_ms)
            }
        }
    }

    async fn execute_cancel(&mut self, token: &TokenId, order_id: OrderId) {
        Metrics::order_canceled(token.as_str());
        let started = Instant::now();
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .policy
            .call("cancel", || gateway.cancel_order(order_id.clone()))
            .await;
        Metrics::gateway_latency("cancel", elapsed_ms(started));

        match result {
            // Already gone counts as canceled.
            Ok(()) | Err(GatewayError::OrderNotFound(_)) => {
                self.orders.on_cancel_acked(token, &order_id);
            }
            Err(e) => {
                Metrics::gateway_error("cancel", e.kind());
                warn!(token = %token.short(), order_id = %order_id, error = %e, "Cancel failed");
                self.orders.on_cancel_failed(token, &order_id);
            }
        }
    }

    async fn execute_sync(&mut self, token: &TokenId, now_ms: u64) -> Vec<LifecycleAction> {
        let started = Instant::now();
        let gateway = &self.ctx.gateway;
        let result = self
            .ctx
            .policy
            .call("open_orders", || gateway.open_orders(token.clone()))
            .await;
        Metrics::gateway_latency("open_orders", elapsed_ms(started));

        match result {
            Ok(venue) => self.orders.sync_open_orders(token, venue, now_ms),
            Err(e) => {
                // Sync stays requested; the next reconcile asks again.
                Metrics::gateway_error("open_orders", e.kind());
                warn!(token = %token.short(), error = %e, "Open orders query failed");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn publish(&self, token: &TradableToken, position: &Position, book: Option<&BookSnapshot>) {
        let mark = book.and_then(BookSnapshot::mid);
        let state = self.exits.state_of(&token.id);
        let report = PositionReport::new(token, position, mark, state);

        Metrics::position(
            token.id.as_str(),
            position.size.to_f64().unwrap_or(0.0),
            report
                .unrealized_pnl
                .and_then(|p| p.to_f64())
                .unwrap_or(0.0),
        );
        Metrics::budget_notional(self.ctx.budget.total().to_f64().unwrap_or(0.0));
        self.ctx.reports.insert(token.id.clone(), report);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel every passive order of the market.
    pub async fn shutdown(&mut self, now_ms: u64) {
        for token in self.tokens.clone() {
            let actions = self.orders.cancel_all(&token.id, now_ms);
            if !actions.is_empty() {
                self.execute(actions, now_ms).await;
            }
        }
        info!(
            market = %self.market.id,
            resting = self.orders.resting_count(),
            "Market loop stopped"
        );
    }

    /// Tick every `interval` until `stop` flips to true or its sender drops,
    /// then cancel resting orders. Returns the inventory for a later loop.
    pub async fn run(
        mut self,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> ParkedInventory {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            market = %self.market.id,
            question = %self.market.question,
            interval_ms = interval.as_millis() as u64,
            "Market loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(crate::now_ms()).await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown(crate::now_ms()).await;
        ParkedInventory {
            ledger: self.ledger,
            exits: self.exits,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn market(&self) -> &Market {
        &self.market
    }

    #[must_use]
    pub fn position(&self, token: &TokenId) -> Position {
        self.ledger.position_of(token)
    }

    #[must_use]
    pub fn exit_state(&self, token: &TokenId) -> ExitState {
        self.exits.state_of(token)
    }

    #[must_use]
    pub fn orders(&self) -> &OrderLifecycleManager {
        &self.orders
    }

    /// Aggregate notional of this market's positions.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.ledger.total_notional()
    }
}

fn empty_quote(token: &TokenId) -> Quote {
    Quote::new(token.clone(), Price::ZERO, Size::ZERO, Price::ZERO, Size::ZERO)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
