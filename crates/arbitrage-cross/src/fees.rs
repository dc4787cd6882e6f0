//! Fee and PnL accounting for closed trades.
//!
//! Fees are modelled as taker fees on both the entry and exit notional of
//! each leg. Funding is supplied by the gateways and defaults to zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use spread_arb_core::{
    Leg, PerLeg, Position, PositionLeg, Side, SpreadSample, TradeSummary, VenueConfig,
};

use crate::spread::ExitView;

// =============================================================================
// Fee Constants
// =============================================================================

/// Default venue A (Binance USDT-M) taker fee rate, 0.05%.
pub const DEFAULT_VENUE_A_TAKER_RATE: Decimal = dec!(0.0005);

/// Default venue B (KuCoin Futures) taker fee rate, 0.06%.
pub const DEFAULT_VENUE_B_TAKER_RATE: Decimal = dec!(0.0006);

// =============================================================================
// Fee Schedule
// =============================================================================

/// Taker fee rate per venue, as a fraction of notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub taker_rate: PerLeg<Decimal>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_rate: PerLeg::new(DEFAULT_VENUE_A_TAKER_RATE, DEFAULT_VENUE_B_TAKER_RATE),
        }
    }
}

impl FeeSchedule {
    pub fn from_venues(a: &VenueConfig, b: &VenueConfig) -> Self {
        Self {
            taker_rate: PerLeg::new(a.taker_fee_rate, b.taker_fee_rate),
        }
    }

    /// Zero fees, for simulations that should ignore costs.
    #[must_use]
    pub fn free() -> Self {
        Self {
            taker_rate: PerLeg::new(Decimal::ZERO, Decimal::ZERO),
        }
    }

    pub fn taker_fee(&self, leg: Leg, notional: Decimal) -> Decimal {
        notional.abs() * *self.taker_rate.get(leg)
    }
}

// =============================================================================
// PnL
// =============================================================================

/// Gross PnL of one leg between entry and exit prices.
pub fn leg_gross_pnl(leg: &PositionLeg, exit_price: Decimal) -> Decimal {
    let units = leg.quantity * leg.contract_size;
    match leg.side {
        Side::Buy => (exit_price - leg.entry_price) * units,
        Side::Sell => (leg.entry_price - exit_price) * units,
    }
}

/// Entry plus exit taker fees for one leg.
pub fn leg_fees(leg: &PositionLeg, exit_price: Decimal, fees: &FeeSchedule) -> Decimal {
    let units = leg.quantity * leg.contract_size;
    fees.taker_fee(leg.leg, units * leg.entry_price) + fees.taker_fee(leg.leg, units * exit_price)
}

/// Inputs observed at close time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFacts {
    /// Exit fill price per leg, as reported by the closing order.
    pub exit_prices: PerLeg<Option<Decimal>>,
    /// Sample that fired the exit, if any. A leg with no reported exit price
    /// is valued at this sample's closing-side quote, or at its entry price
    /// when there is no sample either.
    pub exit_sample: Option<SpreadSample>,
    /// Spread view from the sample that fired the exit, if any.
    pub exit_view: Option<ExitView>,
    pub funding: Decimal,
    pub closed_at: DateTime<Utc>,
    pub forced: bool,
}

/// Builds the trade-closed record.
pub fn summarize_trade(position: &Position, facts: &CloseFacts, fees: &FeeSchedule) -> TradeSummary {
    let exit_price = |leg: &PositionLeg| {
        facts
            .exit_prices
            .get(leg.leg)
            .or_else(|| {
                facts
                    .exit_sample
                    .as_ref()
                    .map(|sample| sample.quote(leg.leg).taker_price(leg.side.opposite()))
            })
            .unwrap_or(leg.entry_price)
    };

    let long_exit = exit_price(&position.long);
    let short_exit = exit_price(&position.short);

    let gross_pnl = leg_gross_pnl(&position.long, long_exit) + leg_gross_pnl(&position.short, short_exit);
    let total_fees = leg_fees(&position.long, long_exit, fees) + leg_fees(&position.short, short_exit, fees);

    TradeSummary {
        position_id: position.id,
        symbol: position.symbol.clone(),
        direction: position.direction,
        entry_basis_pct: position.entry_basis_pct,
        exit_spread_pct: facts.exit_view.map(|v| v.exit_spread_pct),
        captured_spread_pct: facts.exit_view.map(|v| v.captured_pct),
        gross_pnl,
        fees: total_fees,
        funding: facts.funding,
        net_pnl: gross_pnl - total_fees + facts.funding,
        opened_at: position.opened_at,
        closed_at: facts.closed_at,
        forced: facts.forced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spread_arb_core::{Direction, LifecycleState, Quote};
    use uuid::Uuid;

    fn position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "ETHUSDT".to_string(),
            direction: Direction::LongAShortB,
            long: PositionLeg {
                leg: Leg::A,
                venue: "binance".to_string(),
                symbol: "ETHUSDT".to_string(),
                side: Side::Buy,
                quantity: dec!(10),
                entry_price: dec!(10),
                contract_size: dec!(1),
            },
            short: PositionLeg {
                leg: Leg::B,
                venue: "kucoin".to_string(),
                symbol: "ETHUSDTM".to_string(),
                side: Side::Sell,
                quantity: dec!(2),
                entry_price: dec!(10.5),
                contract_size: dec!(5),
            },
            trigger_spread_pct: dec!(5),
            realized_spread_pct: dec!(5),
            entry_basis_pct: dec!(5),
            opened_at: Utc::now(),
            state: LifecycleState::Closing,
        }
    }

    #[test]
    fn test_leg_gross_pnl() {
        let p = position();
        assert_eq!(leg_gross_pnl(&p.long, dec!(10.2)), dec!(2.0));
        assert_eq!(leg_gross_pnl(&p.short, dec!(10.2)), dec!(3.0));
    }

    #[test]
    fn test_summary_nets_fees_and_funding() {
        let p = position();
        let facts = CloseFacts {
            exit_prices: PerLeg::new(Some(dec!(10.2)), Some(dec!(10.2))),
            exit_sample: None,
            exit_view: Some(ExitView {
                exit_spread_pct: dec!(0),
                captured_pct: dec!(5),
            }),
            funding: dec!(-0.1),
            closed_at: Utc::now(),
            forced: false,
        };
        let fees = FeeSchedule {
            taker_rate: PerLeg::new(dec!(0.001), dec!(0.001)),
        };
        let summary = summarize_trade(&p, &facts, &fees);
        assert_eq!(summary.gross_pnl, dec!(5.0));
        // (100 + 102 + 105 + 102) * 0.001
        assert_eq!(summary.fees, dec!(0.409));
        assert_eq!(summary.net_pnl, dec!(5.0) - dec!(0.409) - dec!(0.1));
        assert_eq!(summary.captured_spread_pct, Some(dec!(5)));
    }

    #[test]
    fn test_missing_exit_price_uses_exit_sample_quote() {
        let p = position();
        // Long A closes into the A bid, short B into the B ask.
        let sample = SpreadSample::new(
            Quote::new(dec!(9.8), dec!(9.81)),
            Quote::new(dec!(10.39), dec!(10.4)),
        );
        let facts = CloseFacts {
            exit_prices: PerLeg::new(None, None),
            exit_sample: Some(sample),
            exit_view: None,
            funding: Decimal::ZERO,
            closed_at: Utc::now(),
            forced: false,
        };
        let summary = summarize_trade(&p, &facts, &FeeSchedule::free());
        // Long: (9.8 - 10) * 10 = -2.0. Short: (10.5 - 10.4) * 10 = 1.0.
        assert_eq!(summary.gross_pnl, dec!(-1.0));
    }

    #[test]
    fn test_reported_exit_price_wins_over_sample() {
        let p = position();
        let facts = CloseFacts {
            exit_prices: PerLeg::new(Some(dec!(10.2)), None),
            exit_sample: Some(SpreadSample::new(
                Quote::new(dec!(9.8), dec!(9.81)),
                Quote::new(dec!(10.39), dec!(10.4)),
            )),
            exit_view: None,
            funding: Decimal::ZERO,
            closed_at: Utc::now(),
            forced: false,
        };
        let summary = summarize_trade(&p, &facts, &FeeSchedule::free());
        // Long: (10.2 - 10) * 10 = 2.0. Short: (10.5 - 10.4) * 10 = 1.0.
        assert_eq!(summary.gross_pnl, dec!(3.0));
    }

    #[test]
    fn test_missing_exit_price_values_leg_flat() {
        let p = position();
        let facts = CloseFacts {
            exit_prices: PerLeg::new(None, Some(dec!(10.5))),
            exit_sample: None,
            exit_view: None,
            funding: Decimal::ZERO,
            closed_at: Utc::now(),
            forced: true,
        };
        let summary = summarize_trade(&p, &facts, &FeeSchedule::free());
        assert_eq!(summary.gross_pnl, Decimal::ZERO);
        assert!(summary.forced);
        assert!(summary.exit_spread_pct.is_none());
    }
}
