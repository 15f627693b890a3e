//! Risk and quoting configuration.
//!
//! One immutable `RiskConfig` is shared by every component of a market loop.
//! A reload produces a new value; nothing mutates a config in place.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Interpolation curve for the exit walk-down.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalkCurve {
    /// Exit price moves toward mid linearly in time.
    #[default]
    Linear,
    /// Slow start, fast finish: progress squared.
    Quadratic,
}

impl WalkCurve {
    /// Map walk progress in [0, 1] to the fraction of the anchor-to-mid
    /// distance covered. Input is clamped.
    #[must_use]
    pub fn apply(&self, progress: Decimal) -> Decimal {
        let p = progress.max(Decimal::ZERO).min(Decimal::ONE);
        match self {
            Self::Linear => p,
            Self::Quadratic => p * p,
        }
    }
}

/// Per-strategy risk configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum absolute position per token, in shares (the inventory cap).
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,

    /// Base quote size per side, in shares.
    #[serde(default = "default_base_size")]
    pub base_size: Decimal,

    /// Half-spread around mid when flat, in price units.
    #[serde(default = "default_base_half_spread")]
    pub base_half_spread: Decimal,

    /// Skew sensitivity `k`: both quotes shift by `-k * size / cap`.
    #[serde(default = "default_skew_sensitivity")]
    pub skew_sensitivity: Decimal,

    /// Spread widening `w`: half-spread is `s0 * (1 + w * |size| / cap)`.
    #[serde(default = "default_spread_widening")]
    pub spread_widening: Decimal,

    /// Holding time after which the exit price starts walking toward mid (T1).
    #[serde(default = "default_walk_start_ms")]
    pub walk_start_ms: u64,

    /// Holding time after which the position is force-liquidated (T2).
    #[serde(default = "default_stale_position_ms")]
    pub stale_position_ms: u64,

    /// Walk-down interpolation curve.
    #[serde(default)]
    pub walk_curve: WalkCurve,

    /// Unrealized loss (quote currency, positive) that forces an exit.
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Option<Decimal>,

    /// Unrealized gain (quote currency) that forces an exit.
    #[serde(default)]
    pub take_profit: Option<Decimal>,

    /// Book snapshots older than this are stale and suspend quoting.
    #[serde(default = "default_max_book_age_ms")]
    pub max_book_age_ms: u64,

    /// Minimum age of a live order before it may be replaced on a price move.
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,

    /// Relative size divergence (fraction of desired size) that triggers a
    /// replacement.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: Decimal,

    /// Ticks through the opposite best price for liquidation orders.
    #[serde(default = "default_liquidation_slippage_ticks")]
    pub liquidation_slippage_ticks: u32,

    /// Interval between liquidation attempts while a position remains.
    #[serde(default = "default_liquidation_retry_ms")]
    pub liquidation_retry_ms: u64,

    /// Cancel acknowledgement timeout before the cancel is re-sent.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,

    /// Process-wide notional budget across all tokens. None = unlimited.
    #[serde(default)]
    pub global_max_notional: Option<Decimal>,
}

/// Order size granularity in shares.
pub const SIZE_INCREMENT: Size = Size(Decimal::from_parts(1, 0, 0, false, 2));

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position: default_max_position(),
            base_size: default_base_size(),
            base_half_spread: default_base_half_spread(),
            skew_sensitivity: default_skew_sensitivity(),
            spread_widening: default_spread_widening(),
            walk_start_ms: default_walk_start_ms(),
            stale_position_ms: default_stale_position_ms(),
            walk_curve: WalkCurve::default(),
            stop_loss: default_stop_loss(),
            take_profit: None,
            max_book_age_ms: default_max_book_age_ms(),
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            size_tolerance: default_size_tolerance(),
            liquidation_slippage_ticks: default_liquidation_slippage_ticks(),
            liquidation_retry_ms: default_liquidation_retry_ms(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
            global_max_notional: None,
        }
    }
}

impl RiskConfig {
    /// Reject inconsistent parameter combinations.
    pub fn validate(&self) -> Result<()> {
        if self.max_position <= Decimal::ZERO {
            return Err(invalid("max_position must be positive"));
        }
        if self.base_size <= Decimal::ZERO {
            return Err(invalid("base_size must be positive"));
        }
        if self.base_half_spread < Decimal::ZERO {
            return Err(invalid("base_half_spread must not be negative"));
        }
        if self.skew_sensitivity < Decimal::ZERO || self.spread_widening < Decimal::ZERO {
            return Err(invalid(
                "skew_sensitivity and spread_widening must not be negative",
            ));
        }
        if self.stale_position_ms <= self.walk_start_ms {
            return Err(invalid(&format!(
                "stale_position_ms ({}) must exceed walk_start_ms ({})",
                self.stale_position_ms, self.walk_start_ms
            )));
        }
        if self.stop_loss.is_some_and(|v| v <= Decimal::ZERO) {
            return Err(invalid("stop_loss must be positive when set"));
        }
        if self.take_profit.is_some_and(|v| v <= Decimal::ZERO) {
            return Err(invalid("take_profit must be positive when set"));
        }
        if self.size_tolerance < Decimal::ZERO {
            return Err(invalid("size_tolerance must not be negative"));
        }
        if self.global_max_notional.is_some_and(|v| v <= Decimal::ZERO) {
            return Err(invalid("global_max_notional must be positive when set"));
        }
        Ok(())
    }

    /// Walk-down duration T2 - T1.
    #[must_use]
    pub fn walk_duration_ms(&self) -> u64 {
        self.stale_position_ms.saturating_sub(self.walk_start_ms)
    }

    /// Base size as a `Size`.
    #[must_use]
    pub fn base_size(&self) -> Size {
        Size::new(self.base_size)
    }

    /// Liquidation price offset for a token's tick size.
    #[must_use]
    pub fn liquidation_offset(&self, tick_size: Price) -> Price {
        tick_size * Decimal::from(self.liquidation_slippage_ticks)
    }
}

fn invalid(msg: &str) -> CoreError {
    CoreError::InvalidConfig(msg.to_string())
}

fn default_max_position() -> Decimal {
    Decimal::new(100, 0) // 100 shares
}
fn default_base_size() -> Decimal {
    Decimal::new(20, 0) // 20 shares
}
fn default_base_half_spread() -> Decimal {
    Decimal::new(2, 2) // 0.02
}
fn default_skew_sensitivity() -> Decimal {
    Decimal::new(2, 2) // 0.02 at full cap
}
fn default_spread_widening() -> Decimal {
    Decimal::ONE // spread doubles at full cap
}
fn default_walk_start_ms() -> u64 {
    30_000 // 30 seconds
}
fn default_stale_position_ms() -> u64 {
    60_000 // 60 seconds
}
fn default_stop_loss() -> Option<Decimal> {
    Some(Decimal::new(10, 0)) // $10
}
fn default_max_book_age_ms() -> u64 {
    5_000
}
fn default_min_refresh_interval_ms() -> u64 {
    2_000
}
fn default_size_tolerance() -> Decimal {
    Decimal::new(1, 1) // 10%
}
fn default_liquidation_slippage_ticks() -> u32 {
    2
}
fn default_liquidation_retry_ms() -> u64 {
    3_000 // sell cooldown
}
fn default_cancel_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = RiskConfig::default();
        assert_eq!(config.max_position, dec!(100));
        assert_eq!(config.base_size, dec!(20));
        assert_eq!(config.walk_start_ms, 30_000);
        assert_eq!(config.stale_position_ms, 60_000);
        assert_eq!(config.walk_curve, WalkCurve::Linear);
        assert_eq!(config.stop_loss, Some(dec!(10)));
        assert!(config.take_profit.is_none());
        assert!(config.global_max_notional.is_none());
        assert_eq!(SIZE_INCREMENT.inner(), dec!(0.01));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_defaults() {
        let toml_str = r#"
max_position = "50"
walk_curve = "quadratic"
take_profit = "3.5"
"#;
        let config: RiskConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_position, dec!(50));
        assert_eq!(config.walk_curve, WalkCurve::Quadratic);
        assert_eq!(config.take_profit, Some(dec!(3.5)));
        assert_eq!(config.base_size, dec!(20));
        assert_eq!(config.min_refresh_interval_ms, 2_000);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = RiskConfig {
            walk_start_ms: 60_000,
            stale_position_ms: 60_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nonpositive_cap() {
        let config = RiskConfig {
            max_position: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_walk_curve() {
        assert_eq!(WalkCurve::Linear.apply(dec!(0.5)), dec!(0.5));
        assert_eq!(WalkCurve::Quadratic.apply(dec!(0.5)), dec!(0.25));
        assert_eq!(WalkCurve::Linear.apply(dec!(1.7)), dec!(1));
        assert_eq!(WalkCurve::Linear.apply(dec!(-0.2)), dec!(0));
    }

    #[test]
    fn test_liquidation_offset() {
        let config = RiskConfig::default();
        assert_eq!(
            config.liquidation_offset(Price::new(dec!(0.01))).inner(),
            dec!(0.02)
        );
    }
}
