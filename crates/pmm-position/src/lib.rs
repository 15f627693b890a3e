//! Inventory state for the market maker.
//!
//! - `PositionLedger`: signed size, VWAP entry, age clock and realized P&L
//!   per token, mutated only by confirmed fills
//! - `ExitScheduler`: per-position exit state machine (walk-down, stale
//!   dump, stop-loss, take-profit)
//! - `InventoryReport`: point-in-time JSON dump of all positions

pub mod error;
pub mod exit;
pub mod ledger;
pub mod report;

pub use error::{PositionError, PositionResult};
pub use exit::{ExitAction, ExitDecision, ExitScheduler, ExitState, ForcedExitReason};
pub use ledger::{Position, PositionLedger};
pub use report::{InventoryReport, PositionReport};
