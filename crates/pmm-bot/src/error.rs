//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] pmm_core::CoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] pmm_gateway::GatewayError),

    #[error("Risk error: {0}")]
    Risk(#[from] pmm_risk::RiskError),

    #[error("Position error: {0}")]
    Position(#[from] pmm_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pmm_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
