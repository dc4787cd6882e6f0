//! Directional spread evaluation.
//!
//! For a direction that buys venue L and sells venue S, the entry spread is
//!
//! ```text
//! spread = (bid_S - ask_L) / ask_L * 100
//! ```
//!
//! i.e. what a taker would capture by buying at L's ask and selling at S's
//! bid. Once a position is open, the cost of unwinding it is expressed
//! against the long leg's entry price:
//!
//! ```text
//! exit_spread = (ask_S - bid_L) / entry_price_L * 100
//! captured    = entry_basis - exit_spread
//! ```
//!
//! # Example
//!
//! ```ignore
//! use spread_arb_cross::spread::SpreadEvaluator;
//!
//! let evaluator = SpreadEvaluator::new(dec!(0.25), DirectionFilter::Both);
//! if let Some(signal) = evaluator.evaluate(&sample) {
//!     println!("{} {:.3}%", signal.direction, signal.value_pct);
//! }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use spread_arb_core::{
    Direction, DirectionFilter, DirectionalSpread, Position, Quote, SpreadSample,
};

// =============================================================================
// Pure Spread Math
// =============================================================================

/// Entry spread for buying at `long.ask` and selling at `short.bid`.
///
/// Returns `None` when either price is not strictly positive.
pub fn entry_spread_pct(long: &Quote, short: &Quote) -> Option<Decimal> {
    if long.ask <= Decimal::ZERO || short.bid <= Decimal::ZERO {
        return None;
    }
    Some((short.bid - long.ask) / long.ask * Decimal::ONE_HUNDRED)
}

/// Entry spread for `direction` within a sample.
pub fn directional_spread(sample: &SpreadSample, direction: Direction) -> Option<Decimal> {
    entry_spread_pct(
        sample.quote(direction.long_leg()),
        sample.quote(direction.short_leg()),
    )
}

/// Spread-space view of an open position against a fresh sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitView {
    /// Cost of closing both legs now, in percent of the long entry price.
    pub exit_spread_pct: Decimal,
    /// Entry basis minus exit spread.
    pub captured_pct: Decimal,
}

/// Computes exit and captured spread for an open position.
///
/// Returns `None` when the sample holds non-positive prices.
pub fn exit_view(position: &Position, sample: &SpreadSample) -> Option<ExitView> {
    let long_quote = sample.quote(position.long.leg);
    let short_quote = sample.quote(position.short.leg);
    if !long_quote.is_valid() || !short_quote.is_valid() {
        return None;
    }
    if position.long.entry_price <= Decimal::ZERO {
        return None;
    }
    let exit_spread_pct =
        (short_quote.ask - long_quote.bid) / position.long.entry_price * Decimal::ONE_HUNDRED;
    Some(ExitView {
        exit_spread_pct,
        captured_pct: position.entry_basis_pct - exit_spread_pct,
    })
}

/// Spread implied by actual fill prices.
pub fn realized_spread_pct(long_fill: Decimal, short_fill: Decimal) -> Option<Decimal> {
    if long_fill <= Decimal::ZERO || short_fill <= Decimal::ZERO {
        return None;
    }
    Some((short_fill - long_fill) / long_fill * Decimal::ONE_HUNDRED)
}

// =============================================================================
// Spread Evaluator
// =============================================================================

/// Picks the best tradable direction for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadEvaluator {
    /// Spreads below this are not signals.
    pub min_signal_pct: Decimal,
    /// Directions eligible for trading.
    pub directions: DirectionFilter,
}

impl SpreadEvaluator {
    pub const fn new(min_signal_pct: Decimal, directions: DirectionFilter) -> Self {
        Self {
            min_signal_pct,
            directions,
        }
    }

    /// Returns true if `direction` may be traded.
    pub const fn allows(&self, direction: Direction) -> bool {
        matches!(
            (self.directions, direction),
            (DirectionFilter::Both, _)
                | (DirectionFilter::LongAShortB, Direction::LongAShortB)
                | (DirectionFilter::LongBShortA, Direction::LongBShortA)
        )
    }

    /// The larger of the allowed directional spreads, without thresholding.
    ///
    /// Returns `None` when any price in the sample is non-positive.
    pub fn best(&self, sample: &SpreadSample) -> Option<DirectionalSpread> {
        if !sample.is_valid() {
            return None;
        }
        Direction::ALL
            .into_iter()
            .filter(|d| self.allows(*d))
            .filter_map(|direction| {
                directional_spread(sample, direction).map(|value_pct| DirectionalSpread {
                    value_pct,
                    direction,
                })
            })
            .max_by(|x, y| x.value_pct.cmp(&y.value_pct))
    }

    /// The best directional spread if it reaches the signal threshold.
    pub fn evaluate(&self, sample: &SpreadSample) -> Option<DirectionalSpread> {
        self.best(sample)
            .filter(|spread| spread.value_pct >= self.min_signal_pct)
    }

    /// Spread for a fixed direction, ignoring the threshold. Used while
    /// confirming an entry already committed to a direction.
    pub fn spread_for(&self, sample: &SpreadSample, direction: Direction) -> Option<Decimal> {
        if !sample.is_valid() {
            return None;
        }
        directional_spread(sample, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use spread_arb_core::{LifecycleState, Leg, PositionLeg, Side};
    use uuid::Uuid;

    fn sample(a: (Decimal, Decimal), b: (Decimal, Decimal)) -> SpreadSample {
        SpreadSample::new(Quote::new(a.0, a.1), Quote::new(b.0, b.1))
    }

    fn position(basis: Decimal, long_entry: Decimal) -> Position {
        let leg = |leg, side, price| PositionLeg {
            leg,
            venue: "v".to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            quantity: dec!(1),
            entry_price: price,
            contract_size: dec!(1),
        };
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::LongAShortB,
            long: leg(Leg::A, Side::Buy, long_entry),
            short: leg(Leg::B, Side::Sell, long_entry * dec!(1.05)),
            trigger_spread_pct: basis,
            realized_spread_pct: basis,
            entry_basis_pct: basis,
            opened_at: Utc::now(),
            state: LifecycleState::Open,
        }
    }

    // ==================== Entry Spread Tests ====================

    #[test]
    fn test_entry_spread_long_a_short_b() {
        // buy A at 100, sell B at 105
        let s = sample((dec!(99.9), dec!(100)), (dec!(105), dec!(105.1)));
        assert_eq!(directional_spread(&s, Direction::LongAShortB), Some(dec!(5)));
    }

    #[test]
    fn test_evaluate_picks_larger_direction() {
        let evaluator = SpreadEvaluator::new(dec!(0.25), DirectionFilter::Both);
        // B is cheap: buy B at 100, sell A at 101
        let s = sample((dec!(101), dec!(101.1)), (dec!(99.9), dec!(100)));
        let signal = evaluator.evaluate(&s).unwrap();
        assert_eq!(signal.direction, Direction::LongBShortA);
        assert_eq!(signal.value_pct, dec!(1));
    }

    #[test]
    fn test_evaluate_below_threshold_is_none() {
        let evaluator = SpreadEvaluator::new(dec!(0.25), DirectionFilter::Both);
        let s = sample((dec!(100), dec!(100.01)), (dec!(100.1), dec!(100.11)));
        assert!(evaluator.evaluate(&s).is_none());
        assert!(evaluator.best(&s).is_some());
    }

    #[test]
    fn test_evaluate_rejects_non_positive_prices() {
        let evaluator = SpreadEvaluator::new(dec!(0), DirectionFilter::Both);
        let s = sample((dec!(0), dec!(100)), (dec!(105), dec!(106)));
        assert!(evaluator.evaluate(&s).is_none());
        assert!(evaluator.spread_for(&s, Direction::LongAShortB).is_none());
    }

    #[test]
    fn test_direction_filter() {
        let evaluator = SpreadEvaluator::new(dec!(0.25), DirectionFilter::LongAShortB);
        let s = sample((dec!(101), dec!(101.1)), (dec!(99.9), dec!(100)));
        // Only long-B is profitable, and it is filtered out.
        assert!(evaluator.evaluate(&s).is_none());
    }

    // ==================== Exit Spread Tests ====================

    #[test]
    fn test_exit_view() {
        let p = position(dec!(5), dec!(100));
        // long A bid 101, short B ask 103 -> exit spread 2%
        let s = sample((dec!(101), dec!(101.1)), (dec!(102.9), dec!(103)));
        let view = exit_view(&p, &s).unwrap();
        assert_eq!(view.exit_spread_pct, dec!(2));
        assert_eq!(view.captured_pct, dec!(3));
    }

    #[test]
    fn test_exit_view_converged() {
        let p = position(dec!(5), dec!(100));
        let s = sample((dec!(101), dec!(101.1)), (dec!(100.9), dec!(101.01)));
        let view = exit_view(&p, &s).unwrap();
        assert_eq!(view.exit_spread_pct, dec!(0.01));
    }

    #[test]
    fn test_realized_spread() {
        assert_eq!(realized_spread_pct(dec!(100), dec!(104.9)), Some(dec!(4.9)));
        assert_eq!(realized_spread_pct(dec!(0), dec!(104.9)), None);
    }
}
