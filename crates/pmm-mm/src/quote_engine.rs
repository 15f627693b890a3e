//! Quote price calculation engine.
//!
//! Computes bid/ask prices for one outcome token based on:
//! - Book mid (only from a fresh, valid book)
//! - Inventory skew (shift both quotes against the current exposure)
//! - Spread widening (half-spread grows with `|size| / cap`)
//!
//! Prices land on the tick grid as a band: the skewed centre is rounded to
//! the nearest tick and the half-spread is rounded up to whole ticks. Near
//! the domain edge the band is shifted, never narrowed, so the quoted spread
//! only depends on the half-spread and cannot shrink as exposure grows.
//!
//! Sizes start at the configured base size; the risk controller narrows
//! them afterwards.

use std::fmt;

use pmm_core::{BookSnapshot, BookState, Price, Quote, RiskConfig, TradableToken};
use rust_decimal::Decimal;
use tracing::trace;

/// Why no quote was produced for a token this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoQuote {
    /// No snapshot, or the snapshot is older than `max_book_age_ms`.
    StaleBook,
    /// The book has no usable mid.
    BookState(BookState),
    /// The quote band is wider than the tradable range `[tick, 1 - tick]`.
    CollapsedSpread,
}

impl NoQuote {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::StaleBook => "stale_book",
            Self::BookState(BookState::NoBid) => "no_bid",
            Self::BookState(BookState::NoAsk) => "no_ask",
            Self::BookState(BookState::Empty) => "empty_book",
            Self::BookState(BookState::Crossed) => "crossed_book",
            Self::BookState(BookState::Locked) => "locked_book",
            Self::BookState(BookState::OutOfDomain) => "out_of_domain",
            Self::BookState(BookState::Valid) => "valid",
            Self::CollapsedSpread => "collapsed_spread",
        }
    }
}

impl fmt::Display for NoQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleBook => write!(f, "stale book"),
            Self::BookState(state) => write!(f, "book state {state}"),
            Self::CollapsedSpread => write!(f, "collapsed spread"),
        }
    }
}

/// Unrounded, unclamped target prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPrices {
    pub mid: Decimal,
    /// Skew offset applied to both sides.
    pub offset: Decimal,
    pub half_spread: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

impl TargetPrices {
    /// Raw spread `ask - bid`.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Signed inventory as a fraction of the cap, clamped to [-1, 1].
fn exposure_ratio(position: Decimal, config: &RiskConfig) -> Decimal {
    if config.max_position <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (position / config.max_position)
        .max(Decimal::NEGATIVE_ONE)
        .min(Decimal::ONE)
}

/// Skew offset `-k * size / cap`. Negative when long, positive when short.
#[must_use]
pub fn skew_offset(position: Decimal, config: &RiskConfig) -> Decimal {
    -config.skew_sensitivity * exposure_ratio(position, config)
}

/// Half-spread `s0 * (1 + w * |size| / cap)`.
#[must_use]
pub fn half_spread(position: Decimal, config: &RiskConfig) -> Decimal {
    let ratio = exposure_ratio(position, config).abs();
    config.base_half_spread * (Decimal::ONE + config.spread_widening * ratio)
}

/// Target prices around `mid` for a signed position.
#[must_use]
pub fn target_prices(mid: Price, position: Decimal, config: &RiskConfig) -> TargetPrices {
    let mid = mid.inner();
    let offset = skew_offset(position, config);
    let half_spread = half_spread(position, config);
    TargetPrices {
        mid,
        offset,
        half_spread,
        bid: mid + offset - half_spread,
        ask: mid + offset + half_spread,
    }
}

/// Place `targets` on the tick grid as a band of whole ticks around the
/// rounded centre, shifted inside `[tick, 1 - tick]`.
///
/// Returns `None` when the band does not fit in the domain.
#[must_use]
pub fn tick_band(targets: &TargetPrices, tick: Price) -> Option<(Price, Price)> {
    if !tick.is_positive() {
        return None;
    }
    let step = tick.inner();
    let ticks = (targets.half_spread / step).ceil().max(Decimal::ONE);
    let width = ticks * step;

    let lo = step;
    let hi = Decimal::ONE - step;
    if width + width > hi - lo {
        return None;
    }

    let centre = Price::new(targets.mid + targets.offset)
        .round_to_tick(tick)
        .inner();
    let mut bid = centre - width;
    let mut ask = centre + width;
    if bid < lo {
        ask += lo - bid;
        bid = lo;
    }
    if ask > hi {
        bid -= ask - hi;
        ask = hi;
    }
    Some((Price::new(bid), Price::new(ask)))
}

/// Stateless quote calculator.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuoteEngine;

impl QuoteEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compute the two-sided quote for a token.
    ///
    /// Fails closed: a missing, stale or unquotable book yields `NoQuote`
    /// rather than a price derived from an unreliable mid.
    pub fn compute_quote(
        &self,
        token: &TradableToken,
        book: Option<&BookSnapshot>,
        position: Decimal,
        config: &RiskConfig,
        now_ms: u64,
    ) -> Result<Quote, NoQuote> {
        let book = book.ok_or(NoQuote::StaleBook)?;
        if !book.is_fresh(now_ms, config.max_book_age_ms) {
            return Err(NoQuote::StaleBook);
        }
        let state = book.state();
        let mid = book.mid().ok_or(NoQuote::BookState(state))?;

        let targets = target_prices(mid, position, config);
        let (bid, ask) =
            tick_band(&targets, token.tick_size).ok_or(NoQuote::CollapsedSpread)?;

        trace!(
            token = %token.id.short(),
            mid = %mid,
            offset = %targets.offset,
            half_spread = %targets.half_spread,
            bid = %bid,
            ask = %ask,
            "Quote computed"
        );

        let size = config.base_size();
        Ok(Quote::new(token.id.clone(), bid, size, ask, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::{MarketId, Outcome, Size, TokenId};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn token() -> TradableToken {
        TradableToken {
            id: TokenId::new("yes-token"),
            market: MarketId::new("m"),
            outcome: Outcome::Yes,
            tick_size: Price::new(dec!(0.01)),
            min_order_size: Size::ZERO,
        }
    }

    fn book(bid: Option<Decimal>, ask: Option<Decimal>, ts: u64) -> BookSnapshot {
        BookSnapshot::new(
            TokenId::new("yes-token"),
            bid.map(Price::new),
            ask.map(Price::new),
            ts,
        )
    }

    fn config() -> RiskConfig {
        RiskConfig {
            max_position: dec!(100),
            base_size: dec!(20),
            base_half_spread: dec!(0.02),
            skew_sensitivity: dec!(0.02),
            spread_widening: dec!(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_symmetric_quote_when_flat() {
        let b = book(Some(dec!(0.48)), Some(dec!(0.52)), 1_000);
        let q = QuoteEngine::new()
            .compute_quote(&token(), Some(&b), dec!(0), &config(), 1_000)
            .unwrap();

        assert_eq!(q.bid_price.inner(), dec!(0.48));
        assert_eq!(q.ask_price.inner(), dec!(0.52));
        assert_eq!(q.bid_size.inner(), dec!(20));
        assert_eq!(q.ask_size.inner(), dec!(20));
    }

    #[test]
    fn test_long_position_skews_down_and_widens() {
        let b = book(Some(dec!(0.48)), Some(dec!(0.52)), 1_000);
        // x = 50: offset = -0.01, half-spread = 0.02 * 1.5 = 0.03
        let q = QuoteEngine::new()
            .compute_quote(&token(), Some(&b), dec!(50), &config(), 1_000)
            .unwrap();

        assert_eq!(q.bid_price.inner(), dec!(0.46));
        assert_eq!(q.ask_price.inner(), dec!(0.52));
    }

    #[test]
    fn test_short_position_skews_up() {
        let b = book(Some(dec!(0.48)), Some(dec!(0.52)), 1_000);
        let q = QuoteEngine::new()
            .compute_quote(&token(), Some(&b), dec!(-100), &config(), 1_000)
            .unwrap();

        // offset = +0.02, half-spread = 0.04
        assert_eq!(q.bid_price.inner(), dec!(0.48));
        assert_eq!(q.ask_price.inner(), dec!(0.56));
    }

    #[test]
    fn test_off_tick_mid_rounds_centre_not_sides() {
        let b = book(Some(dec!(0.481)), Some(dec!(0.52)), 1_000);
        // mid = 0.5005 -> centre 0.50, two ticks each side.
        let q = QuoteEngine::new()
            .compute_quote(&token(), Some(&b), dec!(0), &config(), 1_000)
            .unwrap();

        assert_eq!(q.bid_price.inner(), dec!(0.48));
        assert_eq!(q.ask_price.inner(), dec!(0.52));
    }

    #[test]
    fn test_small_skew_keeps_spread() {
        let cfg = RiskConfig {
            skew_sensitivity: dec!(0.01),
            spread_widening: dec!(0),
            ..config()
        };
        let b = book(Some(dec!(0.481)), Some(dec!(0.52)), 1_000);
        let engine = QuoteEngine::new();
        let flat = engine
            .compute_quote(&token(), Some(&b), dec!(0), &cfg, 1_000)
            .unwrap();
        let long = engine
            .compute_quote(&token(), Some(&b), dec!(5), &cfg, 1_000)
            .unwrap();
        assert_eq!(flat.spread().inner(), dec!(0.04));
        assert_eq!(long.spread().inner(), dec!(0.04));
    }

    #[test]
    fn test_band_shifted_at_domain_edge() {
        let b = book(Some(dec!(0.01)), Some(dec!(0.03)), 1_000);
        let q = QuoteEngine::new()
            .compute_quote(&token(), Some(&b), dec!(0), &config(), 1_000)
            .unwrap();

        // Centre 0.02 would put the bid at 0.00; the band moves up whole.
        assert_eq!(q.bid_price.inner(), dec!(0.01));
        assert_eq!(q.ask_price.inner(), dec!(0.05));
    }

    #[test]
    fn test_skew_into_edge_does_not_narrow_spread() {
        let cfg = RiskConfig {
            skew_sensitivity: dec!(0.05),
            ..config()
        };
        let b = book(Some(dec!(0.04)), Some(dec!(0.06)), 1_000);
        let engine = QuoteEngine::new();
        let flat = engine
            .compute_quote(&token(), Some(&b), dec!(0), &cfg, 1_000)
            .unwrap();
        let capped = engine
            .compute_quote(&token(), Some(&b), dec!(100), &cfg, 1_000)
            .unwrap();

        assert_eq!(flat.bid_price.inner(), dec!(0.03));
        assert_eq!(flat.ask_price.inner(), dec!(0.07));
        assert_eq!(capped.bid_price.inner(), dec!(0.01));
        assert_eq!(capped.ask_price.inner(), dec!(0.09));
    }

    #[test]
    fn test_collapsed_spread_when_band_exceeds_domain() {
        let cfg = RiskConfig {
            base_half_spread: dec!(0.45),
            ..config()
        };
        let b = book(Some(dec!(0.49)), Some(dec!(0.51)), 1_000);
        let engine = QuoteEngine::new();

        let flat = engine
            .compute_quote(&token(), Some(&b), dec!(0), &cfg, 1_000)
            .unwrap();
        assert_eq!(flat.bid_price.inner(), dec!(0.05));
        assert_eq!(flat.ask_price.inner(), dec!(0.95));

        // Half-spread 0.9 at the cap cannot fit inside [0.01, 0.99].
        let err = engine
            .compute_quote(&token(), Some(&b), dec!(100), &cfg, 1_000)
            .unwrap_err();
        assert_eq!(err, NoQuote::CollapsedSpread);
    }

    #[test]
    fn test_missing_or_stale_book() {
        let engine = QuoteEngine::new();
        let cfg = config();
        assert_eq!(
            engine.compute_quote(&token(), None, dec!(0), &cfg, 1_000),
            Err(NoQuote::StaleBook)
        );

        let b = book(Some(dec!(0.48)), Some(dec!(0.52)), 1_000);
        let now = 1_000 + cfg.max_book_age_ms + 1;
        assert_eq!(
            engine.compute_quote(&token(), Some(&b), dec!(0), &cfg, now),
            Err(NoQuote::StaleBook)
        );
        assert!(engine
            .compute_quote(&token(), Some(&b), dec!(0), &cfg, 1_000 + cfg.max_book_age_ms)
            .is_ok());
    }

    #[test]
    fn test_unquotable_books() {
        let engine = QuoteEngine::new();
        let cfg = config();
        let cases = [
            (None, None, BookState::Empty),
            (None, Some(dec!(0.52)), BookState::NoBid),
            (Some(dec!(0.48)), None, BookState::NoAsk),
            (Some(dec!(0.55)), Some(dec!(0.52)), BookState::Crossed),
            (Some(dec!(0.50)), Some(dec!(0.50)), BookState::Locked),
        ];
        for (bid, ask, state) in cases {
            let b = book(bid, ask, 1_000);
            assert_eq!(
                engine.compute_quote(&token(), Some(&b), dec!(0), &cfg, 1_000),
                Err(NoQuote::BookState(state))
            );
        }
    }

    #[test]
    fn test_exposure_beyond_cap_is_clamped() {
        let cfg = config();
        assert_eq!(skew_offset(dec!(250), &cfg), skew_offset(dec!(100), &cfg));
        assert_eq!(half_spread(dec!(-250), &cfg), dec!(0.04));
    }

    #[test]
    fn test_no_quote_labels() {
        assert_eq!(NoQuote::StaleBook.label(), "stale_book");
        assert_eq!(NoQuote::BookState(BookState::Crossed).label(), "crossed_book");
        assert_eq!(NoQuote::CollapsedSpread.to_string(), "collapsed spread");
    }

    proptest! {
        #[test]
        fn prop_quoted_spread_non_decreasing_in_exposure(
            bid in 1i64..990,
            width in 1i64..60,
            a in 0i64..=15_000,
            b in 0i64..=15_000,
            negative in any::<bool>(),
            k in 0i64..100,
            s0 in 0i64..60,
            w in 0i64..300,
        ) {
            let bid = Decimal::new(bid, 3);
            let ask = bid + Decimal::new(width, 3);
            prop_assume!(ask < Decimal::ONE);
            let cfg = RiskConfig {
                skew_sensitivity: Decimal::new(k, 3),
                base_half_spread: Decimal::new(s0, 3),
                spread_widening: Decimal::new(w, 2),
                ..config()
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let sign = if negative { Decimal::NEGATIVE_ONE } else { Decimal::ONE };
            let snapshot = book(Some(bid), Some(ask), 0);
            let engine = QuoteEngine::new();
            let small = engine.compute_quote(
                &token(), Some(&snapshot), Decimal::new(lo, 2) * sign, &cfg, 0,
            );
            let large = engine.compute_quote(
                &token(), Some(&snapshot), Decimal::new(hi, 2) * sign, &cfg, 0,
            );
            if let Ok(large) = large {
                let small = small.expect("smaller exposure quotes whenever larger does");
                prop_assert!(
                    large.spread() >= small.spread(),
                    "spread {} at |x|={} below {} at |x|={}",
                    large.spread(), hi, small.spread(), lo
                );
            }
        }

        #[test]
        fn prop_target_spread_non_decreasing_in_exposure(
            a in 0i64..=10_000,
            b in 0i64..=10_000,
            negative in any::<bool>(),
            w in 0i64..500,
        ) {
            let cfg = RiskConfig {
                spread_widening: Decimal::new(w, 2),
                ..config()
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let sign = if negative { Decimal::NEGATIVE_ONE } else { Decimal::ONE };
            let mid = Price::new(dec!(0.5));
            let small = target_prices(mid, Decimal::new(lo, 2) * sign, &cfg);
            let large = target_prices(mid, Decimal::new(hi, 2) * sign, &cfg);
            prop_assert!(large.spread() >= small.spread());
        }

        #[test]
        fn prop_skew_sign_opposes_inventory(size in 1i64..=10_000, k in 1i64..100) {
            let cfg = RiskConfig {
                skew_sensitivity: Decimal::new(k, 3),
                ..config()
            };
            let size = Decimal::new(size, 2);
            prop_assert!(skew_offset(size, &cfg) < Decimal::ZERO);
            prop_assert!(skew_offset(-size, &cfg) > Decimal::ZERO);
            prop_assert_eq!(skew_offset(Decimal::ZERO, &cfg), Decimal::ZERO);
        }

        #[test]
        fn prop_quotes_stay_in_domain_and_on_tick(
            bid in 1i64..98,
            width in 1i64..10,
            size in -10_000i64..=10_000,
        ) {
            let bid = Decimal::new(bid, 2);
            let ask = bid + Decimal::new(width, 2);
            prop_assume!(ask < Decimal::ONE);
            let b = book(Some(bid), Some(ask), 0);
            if let Ok(q) = QuoteEngine::new().compute_quote(
                &token(), Some(&b), Decimal::new(size, 2), &config(), 0,
            ) {
                prop_assert!(q.bid_price.inner() >= dec!(0.01));
                prop_assert!(q.ask_price.inner() <= dec!(0.99));
                prop_assert!(q.bid_price < q.ask_price);
                prop_assert_eq!(q.bid_price.round_down_to_tick(token().tick_size), q.bid_price);
                prop_assert_eq!(q.ask_price.round_up_to_tick(token().tick_size), q.ask_price);
            }
        }
    }
}
