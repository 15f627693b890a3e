//! Fill routing.
//!
//! The gateway reports fills for every token through one `poll_fills` call.
//! The router drains it on a fixed cadence and forwards each fill, in gateway
//! order, to the queue of the market loop that owns the token. A loop is the
//! only writer of its ledger, so fills for one token are applied serially.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use pmm_core::{Fill, TokenId};
use pmm_gateway::{CallPolicy, DynGateway, GatewayResult};
use pmm_telemetry::Metrics;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Token → market loop fill queue.
#[derive(Debug, Default)]
pub struct FillRouter {
    routes: DashMap<TokenId, mpsc::Sender<Fill>>,
}

impl FillRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route fills for `token` to `tx`, replacing any previous route.
    pub fn register(&self, token: &TokenId, tx: mpsc::Sender<Fill>) {
        self.routes.insert(token.clone(), tx);
    }

    pub fn unregister(&self, token: &TokenId) {
        self.routes.remove(token);
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Forward one fill. Returns false if no live loop owns the token.
    ///
    /// Waits for queue capacity rather than dropping: a lost fill would leave
    /// the ledger permanently wrong.
    pub async fn route(&self, fill: Fill) -> bool {
        // Clone the sender so no map guard is held across the await.
        let Some(tx) = self.routes.get(&fill.token).map(|r| r.value().clone()) else {
            warn!(
                token = %fill.token.short(),
                order_id = %fill.order_id,
                size = %fill.size,
                "Fill for unrouted token, dropping"
            );
            return false;
        };

        let token = fill.token.clone();
        if tx.send(fill).await.is_err() {
            warn!(token = %token.short(), "Market loop gone, dropping fill route");
            self.routes.remove(&token);
            return false;
        }
        true
    }

    /// Drain the gateway once. Returns the number of fills routed.
    pub async fn poll_once(&self, gateway: &DynGateway, policy: &CallPolicy) -> GatewayResult<usize> {
        let started = Instant::now();
        let result = policy.call("poll_fills", || gateway.poll_fills()).await;
        Metrics::gateway_latency("poll_fills", started.elapsed().as_secs_f64() * 1000.0);

        let fills = match result {
            Ok(fills) => fills,
            Err(e) => {
                Metrics::gateway_error("poll_fills", e.kind());
                return Err(e);
            }
        };

        let mut routed = 0;
        for fill in fills {
            if self.route(fill).await {
                routed += 1;
            }
        }
        if routed > 0 {
            debug!(routed, "Fills routed");
        }
        Ok(routed)
    }

    /// Poll every `interval` until `stop` flips to true or its sender drops.
    pub async fn run(
        self: Arc<Self>,
        gateway: DynGateway,
        policy: CallPolicy,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Fill router started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&gateway, &policy).await {
                        warn!(error = %e, "Fill poll failed");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Fill router stopped");
    }
}
