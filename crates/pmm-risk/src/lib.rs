//! Inventory risk controls.
//!
//! - `RiskController`: per-token size asymmetry and the hard inventory cap
//! - `RiskBudget`: optional process-wide notional budget shared by all markets
//! - `TokenHaltLatch`: permanent quoting halt for tokens whose ledger broke
//!   the cap invariant

pub mod budget;
pub mod controller;
pub mod error;
pub mod halt;

pub use budget::RiskBudget;
pub use controller::{accumulating_side, RiskController};
pub use error::{RiskError, RiskResult};
pub use halt::{HaltReason, TokenHaltLatch};
