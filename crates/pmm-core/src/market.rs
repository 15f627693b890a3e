//! Market identification and specification types.
//!
//! A binary market has two complementary outcome tokens (YES and NO). The
//! quoting core treats each token as an independent instrument with its own
//! book and position; the market only groups them for scheduling.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market (condition) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome token identifier as used by the order book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines; venue token ids are long integers.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the binary outcome a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// A tradable binary market, as produced by market discovery.
///
/// Read-only to the quoting core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Market identifier.
    pub id: MarketId,
    /// Human-readable question, used only for logging.
    #[serde(default)]
    pub question: String,
    /// YES outcome token.
    pub yes_token: TokenId,
    /// NO outcome token.
    pub no_token: TokenId,
    /// Minimum price increment.
    pub tick_size: Price,
    /// Minimum order size in shares.
    pub min_order_size: Size,
    /// Whether the market is accepting orders.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Market {
    /// Validate the venue parameters.
    pub fn validate(&self) -> Result<()> {
        if !self.tick_size.in_unit_interval() {
            return Err(CoreError::InvalidMarket(format!(
                "{}: tick size {} outside (0, 1)",
                self.id, self.tick_size
            )));
        }
        if self.min_order_size.inner().is_sign_negative() {
            return Err(CoreError::InvalidMarket(format!(
                "{}: negative minimum order size",
                self.id
            )));
        }
        if self.yes_token == self.no_token {
            return Err(CoreError::InvalidMarket(format!(
                "{}: YES and NO tokens are identical",
                self.id
            )));
        }
        Ok(())
    }

    /// Both outcome tokens with the market's venue parameters attached.
    pub fn tokens(&self) -> [TradableToken; 2] {
        [
            self.token(Outcome::Yes),
            self.token(Outcome::No),
        ]
    }

    /// One outcome token with the market's venue parameters attached.
    pub fn token(&self, outcome: Outcome) -> TradableToken {
        let id = match outcome {
            Outcome::Yes => self.yes_token.clone(),
            Outcome::No => self.no_token.clone(),
        };
        TradableToken {
            id,
            market: self.id.clone(),
            outcome,
            tick_size: self.tick_size,
            min_order_size: self.min_order_size,
        }
    }
}

/// A single outcome token together with the parameters needed to quote it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradableToken {
    pub id: TokenId,
    pub market: MarketId,
    pub outcome: Outcome,
    pub tick_size: Price,
    pub min_order_size: Size,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            id: MarketId::new("0xabc"),
            question: "Will it rain?".to_string(),
            yes_token: TokenId::new("111"),
            no_token: TokenId::new("222"),
            tick_size: Price::new(dec!(0.01)),
            min_order_size: Size::new(dec!(5)),
            active: true,
        }
    }

    #[test]
    fn test_tokens_carry_market_params() {
        let [yes, no] = market().tokens();
        assert_eq!(yes.outcome, Outcome::Yes);
        assert_eq!(yes.id.as_str(), "111");
        assert_eq!(no.outcome, Outcome::No);
        assert_eq!(no.tick_size.inner(), dec!(0.01));
        assert_eq!(no.market.as_str(), "0xabc");
    }

    #[test]
    fn test_validate_rejects_bad_tick() {
        let mut m = market();
        m.tick_size = Price::new(dec!(0));
        assert!(m.validate().is_err());

        let mut m = market();
        m.no_token = m.yes_token.clone();
        assert!(m.validate().is_err());

        assert!(market().validate().is_ok());
    }

    #[test]
    fn test_short_token_id() {
        let t = TokenId::new("71321045679252212594626385532706912750332728571942532289631379312455583992563");
        assert_eq!(t.short(), "713210456792");
        assert_eq!(TokenId::new("42").short(), "42");
    }
}
