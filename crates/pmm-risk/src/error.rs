//! Risk error types.

use pmm_core::TokenId;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("Position cap breached on {token}: |{size}| > {cap}")]
    CapBreached {
        token: TokenId,
        size: Decimal,
        cap: Decimal,
    },
}

pub type RiskResult<T> = Result<T, RiskError>;
