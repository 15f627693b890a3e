//! Gateway error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Gateway call timed out after {0}ms")]
    Timeout(u64),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Order rejected: {reason}")]
    Rejected { reason: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl GatewayError {
    /// Timeouts, rate limits and outages: retry with backoff, never mutate
    /// ledger state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Unavailable(_)
        )
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::Rejected { .. } => "rejected",
            Self::OrderNotFound(_) => "order_not_found",
            Self::Decode(_) => "decode",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.status().is_some_and(|s| s.as_u16() == 429) {
            Self::RateLimited(e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
