//! Top-of-book snapshot and the mid-price policy.
//!
//! A mid price exists only for a two-sided, uncrossed, unlocked book whose
//! prices lie inside the outcome-token domain. Every other shape yields no
//! mid, and the caller must skip quoting for that tick.

use crate::{OrderSide, Price, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Classification of a book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookState {
    /// Both sides present, bid < ask, both inside (0, 1).
    Valid,
    /// No bid side.
    NoBid,
    /// No ask side.
    NoAsk,
    /// Both sides missing.
    Empty,
    /// Best bid above best ask.
    Crossed,
    /// Best bid equal to best ask.
    Locked,
    /// A quoted price outside the open unit interval.
    OutOfDomain,
}

impl BookState {
    /// Check if this state allows pricing decisions.
    pub fn is_quotable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for BookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
            Self::Crossed => write!(f, "CROSSED"),
            Self::Locked => write!(f, "LOCKED"),
            Self::OutOfDomain => write!(f, "OUT_OF_DOMAIN"),
        }
    }
}

/// Best bid and ask for one outcome token, decoded at the gateway boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Token this book belongs to.
    pub token: TokenId,
    /// Highest resting bid, if any.
    pub best_bid: Option<Price>,
    /// Lowest resting ask, if any.
    pub best_ask: Option<Price>,
    /// Snapshot time (Unix milliseconds).
    pub timestamp_ms: u64,
}

impl BookSnapshot {
    #[must_use]
    pub fn new(
        token: TokenId,
        best_bid: Option<Price>,
        best_ask: Option<Price>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            token,
            best_bid,
            best_ask,
            timestamp_ms,
        }
    }

    /// Classify the book.
    pub fn state(&self) -> BookState {
        let out_of_domain = |p: &Option<Price>| p.is_some_and(|p| !p.in_unit_interval());
        if out_of_domain(&self.best_bid) || out_of_domain(&self.best_ask) {
            return BookState::OutOfDomain;
        }

        match (self.best_bid, self.best_ask) {
            (None, None) => BookState::Empty,
            (None, Some(_)) => BookState::NoBid,
            (Some(_), None) => BookState::NoAsk,
            (Some(bid), Some(ask)) => {
                if bid < ask {
                    BookState::Valid
                } else if bid == ask {
                    BookState::Locked
                } else {
                    BookState::Crossed
                }
            }
        }
    }

    /// Mid price: (bid + ask) / 2.
    ///
    /// Returns None unless the state is `Valid`.
    pub fn mid(&self) -> Option<Price> {
        if !self.state().is_quotable() {
            return None;
        }
        let bid = self.best_bid?;
        let ask = self.best_ask?;
        Some(Price::new((bid.inner() + ask.inner()) / Decimal::TWO))
    }

    /// Age of this snapshot relative to `now_ms`. A snapshot stamped in the
    /// future counts as age zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    /// True if the snapshot is no older than `max_age_ms`.
    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        self.age_ms(now_ms) <= max_age_ms
    }

    /// Best price a marketable order on `side` would trade against:
    /// the ask for a buy, the bid for a sell.
    pub fn opposite_best(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Buy => self.best_ask,
            OrderSide::Sell => self.best_bid,
        }
    }

    /// Best price on our own side of the book: the bid for a buy, the ask
    /// for a sell.
    pub fn same_side_best(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Buy => self.best_bid,
            OrderSide::Sell => self.best_ask,
        }
    }
}
