//! Main application orchestration.
//!
//! Coordinates all components:
//! - Market discovery, refreshed periodically off the quoting path
//! - One market loop task per active market
//! - Fill router feeding the market loops
//! - Risk config hot reload through a watch channel
//! - Periodic inventory report
//!
//! A stopped market's ledger is parked and handed to the next loop started
//! for it. Flat tokens leave the budget and the report; open positions stay
//! in both until they are flat.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::fill_router::FillRouter;
use crate::market_loop::{LoopContext, MarketLoop, ParkedInventory};
use dashmap::DashMap;
use pmm_core::{Market, MarketId, RiskConfig, TokenId};
use pmm_gateway::{
    CallPolicy, ClobRestClient, DryRunGateway, DynDiscovery, DynGateway, GammaDiscovery,
    StaticDiscovery,
};
use pmm_position::{InventoryReport, PositionReport};
use pmm_risk::{RiskBudget, TokenHaltLatch};
use pmm_telemetry::Metrics;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A spawned market loop.
struct RunningMarket {
    market: Market,
    stop: watch::Sender<bool>,
    handle: JoinHandle<ParkedInventory>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    /// File re-read for risk config reloads.
    config_path: Option<String>,
    discovery: DynDiscovery,
    ctx: LoopContext,
    router: Arc<FillRouter>,
    risk_tx: watch::Sender<Arc<RiskConfig>>,
    markets: HashMap<MarketId, RunningMarket>,
    /// Inventory of stopped markets, resumed if they are listed again.
    parked: HashMap<MarketId, ParkedInventory>,
}

impl Application {
    /// Create an application around injected gateway and discovery
    /// implementations.
    pub fn new(config: AppConfig, gateway: DynGateway, discovery: DynDiscovery) -> AppResult<Self> {
        config.validate()?;
        let policy = CallPolicy::from(&config.gateway);
        let (risk_tx, _) = watch::channel(Arc::new(config.risk.clone()));

        Ok(Self {
            ctx: LoopContext {
                gateway,
                policy,
                budget: Arc::new(RiskBudget::new()),
                halts: Arc::new(TokenHaltLatch::new()),
                reports: Arc::new(DashMap::new()),
            },
            config,
            config_path: None,
            discovery,
            router: Arc::new(FillRouter::new()),
            risk_tx,
            markets: HashMap::new(),
            parked: HashMap::new(),
        })
    }

    /// Build the observation-mode application from config: CLOB books behind
    /// a `DryRunGateway`, Gamma discovery when event slugs are configured and
    /// the static market list otherwise.
    ///
    /// Trading mode needs an authenticated gateway, which callers must
    /// inject through [`Application::new`].
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        if !config.is_observation_mode() {
            return Err(AppError::Config(
                "trading mode requires an authenticated order gateway; \
                 run in observation mode or inject a gateway via Application::new"
                    .to_string(),
            ));
        }

        let timeout = Duration::from_millis(config.gateway.timeout_ms);
        let books = ClobRestClient::new(&config.clob_url, timeout)?;
        let gateway: DynGateway = Arc::new(DryRunGateway::new(Arc::new(books)));

        let discovery: DynDiscovery = if config.uses_gamma_discovery() {
            Arc::new(GammaDiscovery::new(
                &config.gamma_url,
                config.event_slugs.clone(),
                timeout,
            )?)
        } else {
            Arc::new(StaticDiscovery::new(config.markets.clone()))
        };

        info!(
            clob_url = %config.clob_url,
            gamma = config.uses_gamma_discovery(),
            "Observation mode: mutating gateway calls are logged, not sent"
        );
        Self::new(config, gateway, discovery)
    }

    /// Enable periodic risk config reloads from `path`.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    // ========================================================================
    // Markets
    // ========================================================================

    /// Sync running loops with discovery: start loops for new active markets,
    /// stop loops for markets that disappeared or became inactive.
    ///
    /// Returns the number of running markets.
    pub async fn refresh_markets(&mut self) -> AppResult<usize> {
        let discovery = Arc::clone(&self.discovery);
        let listed = self
            .ctx
            .policy
            .call("list_markets", || discovery.list_tradable_markets())
            .await
            .map_err(|e| {
                Metrics::gateway_error("list_markets", e.kind());
                e
            })?;

        let mut active: HashMap<MarketId, Market> = HashMap::new();
        for market in listed.into_iter().filter(|m| m.active) {
            match market.validate() {
                Ok(()) => {
                    active.insert(market.id.clone(), market);
                }
                Err(e) => warn!(market = %market.id, error = %e, "Skipping invalid market"),
            }
        }

        let removed: Vec<MarketId> = self
            .markets
            .keys()
            .filter(|id| !active.contains_key(*id))
            .cloned()
            .collect();
        for id in removed {
            self.stop_market(&id).await;
        }

        for (id, market) in active {
            match self.markets.get(&id) {
                None => self.start_market(market),
                Some(running) if running.market != market => {
                    // Venue parameters changed; the loop keeps the old ones.
                    warn!(market = %id, "Market parameters changed, keeping running loop");
                }
                Some(_) => {}
            }
        }

        Metrics::active_markets(self.markets.len() as i64);
        Ok(self.markets.len())
    }

    fn start_market(&mut self, market: Market) {
        let (fill_tx, fill_rx) = mpsc::channel(self.config.fill_queue_capacity);
        for token in market.tokens() {
            self.router.register(&token.id, fill_tx.clone());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut market_loop = MarketLoop::new(
            market.clone(),
            self.ctx.clone(),
            fill_rx,
            self.risk_tx.subscribe(),
        );
        if let Some(parked) = self.parked.remove(&market.id) {
            info!(
                market = %market.id,
                holding = parked.holding().len(),
                "Resuming parked inventory"
            );
            market_loop = market_loop.resume(parked);
        }
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        let handle = tokio::spawn(market_loop.run(interval, stop_rx));

        info!(market = %market.id, question = %market.question, "Market started");
        self.markets.insert(
            market.id.clone(),
            RunningMarket {
                market,
                stop: stop_tx,
                handle,
            },
        );
    }

    /// Stop a market loop and wait for it to cancel its orders.
    async fn stop_market(&mut self, id: &MarketId) {
        let Some(running) = self.markets.remove(id) else {
            return;
        };
        for token in running.market.tokens() {
            self.router.unregister(&token.id);
        }
        let _ = running.stop.send(true);
        match running.handle.await {
            Ok(parked) => self.park(&running.market, parked),
            Err(e) => error!(market = %id, error = %e, "Market loop task failed"),
        }
        info!(market = %id, "Market stopped");
    }

    /// Keep a stopped market's inventory. Flat tokens release their budget
    /// and report entries; open positions keep theirs.
    fn park(&mut self, market: &Market, parked: ParkedInventory) {
        for token in market.tokens() {
            if parked.ledger.position_of(&token.id).is_flat() {
                self.ctx.reports.remove(&token.id);
                self.ctx.budget.update(&token.id, Decimal::ZERO);
            }
        }
        for position in parked.holding() {
            warn!(
                market = %market.id,
                token = %position.token.short(),
                size = %position.size,
                avg_price = %position.avg_price,
                "Market stopped with an open position, kept until relisted"
            );
        }
        self.parked.insert(market.id.clone(), parked);
    }

    /// Number of running market loops.
    #[must_use]
    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    /// Route fills once outside the router task (embedding processes, tests).
    pub async fn poll_fills(&self) -> AppResult<usize> {
        Ok(self
            .router
            .poll_once(&self.ctx.gateway, &self.ctx.policy)
            .await?)
    }

    // ========================================================================
    // Config reload
    // ========================================================================

    /// Re-read the config file and publish a changed risk config to every
    /// market loop. Returns true if a new config was published.
    ///
    /// Only `[risk]` is hot-reloadable; other sections need a restart.
    pub fn reload_config(&mut self) -> AppResult<bool> {
        let Some(path) = self.config_path.as_deref() else {
            return Ok(false);
        };

        let fresh = match AppConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                Metrics::config_reload("invalid");
                return Err(e);
            }
        };

        if fresh.risk == self.config.risk {
            Metrics::config_reload("unchanged");
            return Ok(false);
        }

        info!(path, "Risk config changed, publishing to market loops");
        self.risk_tx.send_replace(Arc::new(fresh.risk.clone()));
        self.config.risk = fresh.risk;
        Metrics::config_reload("applied");
        Ok(true)
    }

    /// Publish a risk config directly (embedding processes, tests).
    pub fn update_risk(&mut self, risk: RiskConfig) -> AppResult<()> {
        risk.validate()?;
        self.risk_tx.send_replace(Arc::new(risk.clone()));
        self.config.risk = risk;
        Ok(())
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Current snapshot of every position published by a market loop.
    #[must_use]
    pub fn inventory(&self) -> InventoryReport {
        let positions: Vec<PositionReport> = self
            .ctx
            .reports
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        InventoryReport::new(crate::now_ms(), positions)
    }

    /// Write the inventory report to `report_path`.
    pub fn write_report(&self) -> AppResult<InventoryReport> {
        let report = self.inventory();
        report.write_atomic(Path::new(&self.config.report_path))?;
        info!(
            path = %self.config.report_path,
            positions = report.positions.len(),
            unrealized_pnl = %report.total_unrealized_pnl(),
            realized_pnl = %report.total_realized_pnl(),
            "Inventory report written"
        );
        Ok(report)
    }

    /// Latest position snapshot for a token.
    #[must_use]
    pub fn position_report(&self, token: &TokenId) -> Option<PositionReport> {
        self.ctx.reports.get(token).map(|r| r.value().clone())
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Run until Ctrl-C.
    pub async fn run(mut self) -> AppResult<()> {
        info!(mode = ?self.config.mode, "Starting application");

        let count = self.refresh_markets().await?;
        if count == 0 {
            warn!("No active markets discovered, waiting for the next refresh");
        }

        let (router_stop_tx, router_stop_rx) = watch::channel(false);
        let router_handle = tokio::spawn(Arc::clone(&self.router).run(
            Arc::clone(&self.ctx.gateway),
            self.ctx.policy,
            Duration::from_millis(self.config.fill_poll_interval_ms()),
            router_stop_rx,
        ));

        let mut discovery_interval =
            tokio::time::interval(Duration::from_secs(self.config.discovery_refresh_secs.max(1)));
        let mut reload_interval =
            tokio::time::interval(Duration::from_secs(self.config.config_reload_secs.max(1)));
        let mut report_interval =
            tokio::time::interval(Duration::from_secs(self.config.report_interval_secs.max(1)));
        // Discovery just ran; skip the immediate first tick.
        discovery_interval.tick().await;

        info!("Entering main event loop");
        loop {
            tokio::select! {
                _ = discovery_interval.tick() => {
                    if let Err(e) = self.refresh_markets().await {
                        warn!(error = %e, "Market discovery refresh failed");
                    }
                }

                _ = reload_interval.tick() => {
                    if self.config.config_reload_secs > 0 {
                        if let Err(e) = self.reload_config() {
                            warn!(error = %e, "Config reload rejected, keeping current config");
                        }
                    }
                }

                _ = report_interval.tick() => {
                    if let Err(e) = self.write_report() {
                        warn!(error = %e, "Inventory report failed");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = router_stop_tx.send(true);
        if let Err(e) = router_handle.await {
            error!(error = %e, "Fill router task failed");
        }
        self.shutdown().await
    }

    /// Stop every market loop (each cancels its passive orders) and write a
    /// final inventory report.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let running: Vec<(MarketId, RunningMarket)> = self.markets.drain().collect();
        for (_, m) in &running {
            for token in m.market.tokens() {
                self.router.unregister(&token.id);
            }
            let _ = m.stop.send(true);
        }

        let results = futures_util::future::join_all(
            running
                .into_iter()
                .map(|(id, m)| async move { (id, m.handle.await) }),
        )
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                error!(market = %id, error = %e, "Market loop task failed");
            }
        }
        Metrics::active_markets(0);

        info!("Final inventory:");
        self.write_report()?;
        Ok(())
    }
}
