//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Invalid fill: {0}")]
    InvalidFill(String),

    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type PositionResult<T> = Result<T, PositionError>;
