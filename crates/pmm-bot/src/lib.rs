//! Prediction-market YES/NO market maker.
//!
//! Main application that orchestrates all components:
//! - Market discovery and per-market loop supervision
//! - Fill routing from the gateway to the owning market loop
//! - Per-market quoting, risk limits, exit scheduling and order lifecycle
//! - Config hot reload and periodic inventory reports

pub mod app;
pub mod config;
pub mod error;
pub mod fill_router;
pub mod market_loop;

pub use app::Application;
pub use config::{AppConfig, OperatingMode};
pub use error::{AppError, AppResult};
pub use fill_router::FillRouter;
pub use market_loop::{LoopContext, MarketLoop, ParkedInventory};

/// Wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
