//! Prometheus metrics for the market maker.
//!
//! Covers:
//! - Quote computation and suppression reasons
//! - Order flow (placed / canceled / rejected) and fills
//! - Exit state transitions and liquidations
//! - Gateway errors and call latency
//! - Per-token position and P&L gauges
//!
//! Metrics live in the default registry. No exporter endpoint is served;
//! an embedding process can call [`Metrics::encode_text`].
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntGauge,
    TextEncoder,
};

use crate::error::TelemetryResult;

/// Quotes computed per token.
pub static QUOTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pmm_quotes_total", "Quotes computed", &["token"]).unwrap()
});

/// Ticks on which no quote was produced.
/// Labels: reason (stale_book/no_bid/no_ask/empty_book/crossed_book/...)
pub static QUOTES_SUPPRESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_quotes_suppressed_total",
        "Ticks without a quote, by reason",
        &["token", "reason"]
    )
    .unwrap()
});

/// Orders sent to the gateway.
/// Labels: kind (passive/liquidation)
pub static ORDERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_orders_placed_total",
        "Orders placed",
        &["token", "side", "kind"]
    )
    .unwrap()
});

/// Cancels sent (including re-sends).
pub static ORDERS_CANCELED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pmm_orders_canceled_total", "Cancels sent", &["token"]).unwrap()
});

/// Orders rejected by the venue.
pub static ORDERS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_orders_rejected_total",
        "Orders rejected by the venue",
        &["token", "side"]
    )
    .unwrap()
});

/// Fills applied to the ledger.
pub static FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pmm_fills_total", "Fills applied", &["token", "side"]).unwrap()
});

/// Filled shares.
pub static FILL_VOLUME: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_fill_volume_shares",
        "Filled shares",
        &["token", "side"]
    )
    .unwrap()
});

/// Exit state machine transitions.
pub static EXIT_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_exit_transitions_total",
        "Exit state transitions",
        &["from", "to"]
    )
    .unwrap()
});

/// Liquidation orders sent.
/// Labels: reason (stale/stop_loss/take_profit/invariant_breach)
pub static LIQUIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_liquidations_total",
        "Liquidation orders sent",
        &["token", "reason"]
    )
    .unwrap()
});

/// Gateway errors.
/// Labels: op (get_book/place/cancel/poll_fills/open_orders), kind
pub static GATEWAY_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_gateway_errors_total",
        "Gateway call errors",
        &["op", "kind"]
    )
    .unwrap()
});

/// Gateway call latency in milliseconds.
pub static GATEWAY_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pmm_gateway_latency_ms",
        "Gateway call latency in milliseconds",
        &["op"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Signed position per token (shares).
pub static POSITION_SIZE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("pmm_position_size", "Signed position in shares", &["token"]).unwrap()
});

/// Unrealized P&L per token.
pub static UNREALIZED_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pmm_unrealized_pnl",
        "Unrealized P&L at mid",
        &["token"]
    )
    .unwrap()
});

/// Token quoting halted after an invariant breach (1 = halted).
pub static TOKEN_HALTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pmm_token_halted",
        "Token quoting halted (1=halted)",
        &["token"]
    )
    .unwrap()
});

/// Markets with a running loop.
pub static ACTIVE_MARKETS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("pmm_active_markets", "Markets with a running loop").unwrap()
});

/// Aggregate notional tracked by the process-wide budget.
pub static BUDGET_NOTIONAL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pmm_budget_notional",
        "Aggregate position notional across tokens"
    )
    .unwrap()
});

/// Config reload attempts.
/// Labels: result (applied/unchanged/invalid)
pub static CONFIG_RELOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_config_reloads_total",
        "Config reload attempts",
        &["result"]
    )
    .unwrap()
});

/// Ledger restatements after the venue reported a different position.
pub static LEDGER_DRIFT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_ledger_drift_total",
        "Ledger positions restated from the venue",
        &["token"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn quote_computed(token: &str) {
        QUOTES_TOTAL.with_label_values(&[token]).inc();
    }

    pub fn quote_suppressed(token: &str, reason: &str) {
        QUOTES_SUPPRESSED_TOTAL
            .with_label_values(&[token, reason])
            .inc();
    }

    /// Record an order sent; `kind` is `passive` or `liquidation`.
    pub fn order_placed(token: &str, side: &str, kind: &str) {
        ORDERS_PLACED_TOTAL
            .with_label_values(&[token, side, kind])
            .inc();
    }

    pub fn order_canceled(token: &str) {
        ORDERS_CANCELED_TOTAL.with_label_values(&[token]).inc();
    }

    pub fn order_rejected(token: &str, side: &str) {
        ORDERS_REJECTED_TOTAL.with_label_values(&[token, side]).inc();
    }

    /// Record a fill and its size in shares.
    pub fn fill(token: &str, side: &str, size: f64) {
        FILLS_TOTAL.with_label_values(&[token, side]).inc();
        FILL_VOLUME.with_label_values(&[token, side]).inc_by(size);
    }

    pub fn exit_transition(from: &str, to: &str) {
        EXIT_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
    }

    pub fn liquidation(token: &str, reason: &str) {
        LIQUIDATIONS_TOTAL.with_label_values(&[token, reason]).inc();
    }

    pub fn gateway_error(op: &str, kind: &str) {
        GATEWAY_ERRORS_TOTAL.with_label_values(&[op, kind]).inc();
    }

    pub fn gateway_latency(op: &str, latency_ms: f64) {
        GATEWAY_LATENCY_MS
            .with_label_values(&[op])
            .observe(latency_ms);
    }

    /// Update the position and P&L gauges for a token.
    pub fn position(token: &str, size: f64, unrealized_pnl: f64) {
        POSITION_SIZE.with_label_values(&[token]).set(size);
        UNREALIZED_PNL
            .with_label_values(&[token])
            .set(unrealized_pnl);
    }

    pub fn token_halted(token: &str, halted: bool) {
        TOKEN_HALTED
            .with_label_values(&[token])
            .set(if halted { 1.0 } else { 0.0 });
    }

    pub fn active_markets(count: i64) {
        ACTIVE_MARKETS.set(count);
    }

    pub fn budget_notional(notional: f64) {
        BUDGET_NOTIONAL.set(notional);
    }

    pub fn ledger_drift(token: &str) {
        LEDGER_DRIFT_TOTAL.with_label_values(&[token]).inc();
    }

    pub fn config_reload(result: &str) {
        CONFIG_RELOADS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Render the default registry in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
