//! Inventory report.
//!
//! A point-in-time dump of every position in a stable JSON structure for
//! external tooling. Written atomically so readers never see a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;

use pmm_core::{MarketId, Outcome, Price, TokenId, TradableToken};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PositionResult;
use crate::exit::ExitState;
use crate::ledger::Position;

/// One position in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionReport {
    pub token: TokenId,
    pub market: MarketId,
    pub outcome: Outcome,
    /// Signed size in shares.
    pub size: Decimal,
    pub avg_price: Decimal,
    /// Mid used for marking, if the book was quotable.
    pub mark: Option<Price>,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub exit_state: ExitState,
}

impl PositionReport {
    #[must_use]
    pub fn new(
        token: &TradableToken,
        position: &Position,
        mark: Option<Price>,
        exit_state: ExitState,
    ) -> Self {
        Self {
            token: token.id.clone(),
            market: token.market.clone(),
            outcome: token.outcome,
            size: position.size,
            avg_price: position.avg_price,
            mark,
            unrealized_pnl: mark.map(|m| position.unrealized_pnl(m)),
            realized_pnl: position.realized_pnl,
            exit_state,
        }
    }
}

/// Snapshot of all positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReport {
    pub generated_at_ms: u64,
    pub positions: Vec<PositionReport>,
}

impl InventoryReport {
    /// Build a report; positions are sorted by market, then outcome.
    #[must_use]
    pub fn new(generated_at_ms: u64, mut positions: Vec<PositionReport>) -> Self {
        positions.sort_by(|a, b| {
            a.market
                .cmp(&b.market)
                .then_with(|| outcome_rank(a.outcome).cmp(&outcome_rank(b.outcome)))
                .then_with(|| a.token.cmp(&b.token))
        });
        Self {
            generated_at_ms,
            positions,
        }
    }

    /// Sum of unrealized P&L over marked positions.
    #[must_use]
    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.iter().filter_map(|p| p.unrealized_pnl).sum()
    }

    /// Sum of realized P&L.
    #[must_use]
    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.realized_pnl).sum()
    }

    /// Write as pretty JSON via a temp file and rename.
    pub fn write_atomic(&self, path: &Path) -> PositionResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);

        let body = serde_json::to_vec_pretty(self)?;
        {
            let mut file = fs::File::create(tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(tmp, path)?;
        Ok(())
    }
}

fn outcome_rank(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Yes => 0,
        Outcome::No => 1,
    }
}
