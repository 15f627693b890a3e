//! Market making strategy for binary-outcome tokens.
//!
//! - Quote calculation with inventory skew and exposure-scaled spread
//! - Quote lifecycle management (place/cancel/replace) against live orders
//!
//! # Architecture
//!
//! ```text
//! Book snapshot → QuoteEngine.compute_quote()
//!                  ├─ mid from a valid, fresh book only
//!                  ├─ skew + spread widening from signed inventory
//!                  └─ Quote (base sizes)
//!                       ↓ (risk limits, exit override)
//!                 OrderLifecycleManager.reconcile()
//!                  └─ LifecycleAction: place / cancel / sync open orders
//! ```

pub mod lifecycle;
pub mod quote_engine;

pub use lifecycle::{LifecycleAction, OrderLifecycleManager, SlotState};
pub use quote_engine::{
    half_spread, skew_offset, target_prices, tick_band, NoQuote, QuoteEngine, TargetPrices,
};
