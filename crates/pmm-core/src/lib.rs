//! Core domain types for the binary-outcome market maker.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `TokenId`, `MarketId`, `Market`: instruments produced by market discovery
//! - `Price`, `Size`: precision-safe numeric types
//! - `BookSnapshot`: top of book with the mid-price policy
//! - `Quote`, `Fill`, `LiveOrder`, `OrderRequest`: quoting and execution records
//! - `RiskConfig`: immutable per-strategy risk parameters

pub mod config;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;
pub mod types;

pub use config::{RiskConfig, WalkCurve};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use execution::{Fill, LiveOrder, OrderRequest, Quote};
pub use market::{Market, MarketId, Outcome, TokenId, TradableToken};
pub use order::{OrderId, OrderSide, TimeInForce};
pub use types::{BookSnapshot, BookState};
