//! Application configuration.

use crate::error::{AppError, AppResult};
use pmm_core::{Market, RiskConfig};
use pmm_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Compute quotes and log intended orders; never mutate the venue.
    #[default]
    Observation,
    /// Live trading through an authenticated gateway.
    Trading,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Operating mode.
    #[serde(default)]
    pub mode: OperatingMode,
    /// CLOB REST base URL (order books).
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    /// Gamma REST base URL (market discovery).
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    /// Market loop tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Fill polling interval. Defaults to the tick interval when unset.
    #[serde(default)]
    pub fill_poll_interval_ms: Option<u64>,
    /// Market discovery refresh interval.
    #[serde(default = "default_discovery_refresh_secs")]
    pub discovery_refresh_secs: u64,
    /// Config file re-read interval (0 = never).
    #[serde(default = "default_config_reload_secs")]
    pub config_reload_secs: u64,
    /// Inventory report interval.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Inventory report output file.
    #[serde(default = "default_report_path")]
    pub report_path: String,
    /// Per-market fill queue capacity.
    #[serde(default = "default_fill_queue_capacity")]
    pub fill_queue_capacity: usize,
    /// Gateway timeouts and retry policy.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Quoting and inventory risk parameters.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Static market list, used when no event slugs are configured.
    #[serde(default)]
    pub markets: Vec<Market>,
    /// Gamma event slugs to discover markets from.
    #[serde(default)]
    pub event_slugs: Vec<String>,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_discovery_refresh_secs() -> u64 {
    300 // 5 minutes
}

fn default_config_reload_secs() -> u64 {
    10
}

fn default_report_interval_secs() -> u64 {
    60
}

fn default_report_path() -> String {
    "data/inventory.json".to_string()
}

fn default_fill_queue_capacity() -> usize {
    1_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            clob_url: default_clob_url(),
            gamma_url: default_gamma_url(),
            tick_interval_ms: default_tick_interval_ms(),
            fill_poll_interval_ms: None,
            discovery_refresh_secs: default_discovery_refresh_secs(),
            config_reload_secs: default_config_reload_secs(),
            report_interval_secs: default_report_interval_secs(),
            report_path: default_report_path(),
            fill_queue_capacity: default_fill_queue_capacity(),
            gateway: GatewayConfig::default(),
            risk: RiskConfig::default(),
            markets: Vec::new(),
            event_slugs: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load and validate a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the market loops cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        self.risk.validate()?;
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config("tick_interval_ms must be positive".to_string()));
        }
        if self.fill_queue_capacity == 0 {
            return Err(AppError::Config(
                "fill_queue_capacity must be positive".to_string(),
            ));
        }
        for market in &self.markets {
            market.validate()?;
        }
        Ok(())
    }

    /// Check if in observation mode.
    #[must_use]
    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }

    /// Markets come from Gamma when event slugs are configured.
    #[must_use]
    pub fn uses_gamma_discovery(&self) -> bool {
        !self.event_slugs.is_empty()
    }

    #[must_use]
    pub fn fill_poll_interval_ms(&self) -> u64 {
        self.fill_poll_interval_ms.unwrap_or(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.is_observation_mode());
        assert!(config.markets.is_empty());
        assert!(!config.uses_gamma_discovery());
        assert_eq!(config.fill_poll_interval_ms(), 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_with_markets() {
        let toml_str = r#"
mode = "observation"
tick_interval_ms = 500

[risk]
max_position = "50"
walk_curve = "quadratic"

[gateway]
timeout_ms = 2000

[[markets]]
id = "0xabc"
question = "Will it rain?"
yes_token = "111"
no_token = "222"
tick_size = "0.01"
min_order_size = "5"
"#;
        let config = AppConfig::parse(toml_str).unwrap();
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.risk.max_position, dec!(50));
        assert_eq!(config.risk.base_size, dec!(20));
        assert_eq!(config.gateway.timeout_ms, 2_000);
        assert_eq!(config.gateway.max_attempts, 3);
        assert_eq!(config.markets.len(), 1);
        assert!(config.markets[0].active);
        assert_eq!(config.markets[0].min_order_size.inner(), dec!(5));
    }

    #[test]
    fn test_invalid_risk_rejected() {
        let toml_str = r#"
[risk]
walk_start_ms = 60000
stale_position_ms = 30000
"#;
        assert!(matches!(
            AppConfig::parse(toml_str),
            Err(AppError::Core(_))
        ));
    }

    #[test]
    fn test_shipped_default_file_parses() {
        let config = AppConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_trading_mode_parses() {
        let config = AppConfig::parse("mode = \"trading\"").unwrap();
        assert!(!config.is_observation_mode());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("mode"));
        assert!(toml_str.contains("report_path"));
    }
}
