//! Market and instrument types shared by the engine and the venue adapters.
//!
//! The engine always trades exactly two venues, referred to as leg `A` and
//! leg `B`. Anything that exists once per venue is stored in a [`PerLeg`].

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Legs and Directions
// =============================================================================

/// One of the two configured venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    A,
    B,
}

impl Leg {
    /// Both legs, in a stable order.
    pub const BOTH: [Leg; 2] = [Leg::A, Leg::B];

    /// Returns the opposite venue.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Signed multiplier applied to a quantity when this side fills.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Which venue is bought and which is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Buy on venue A, sell on venue B.
    LongAShortB,
    /// Buy on venue B, sell on venue A.
    LongBShortA,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::LongAShortB, Direction::LongBShortA];

    #[must_use]
    pub const fn long_leg(self) -> Leg {
        match self {
            Self::LongAShortB => Leg::A,
            Self::LongBShortA => Leg::B,
        }
    }

    #[must_use]
    pub const fn short_leg(self) -> Leg {
        self.long_leg().other()
    }

    /// Entry side for the given leg under this direction.
    #[must_use]
    pub const fn entry_side(self, leg: Leg) -> Side {
        if matches!(
            (self, leg),
            (Self::LongAShortB, Leg::A) | (Self::LongBShortA, Leg::B)
        ) {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "long {} / short {}", self.long_leg(), self.short_leg())
    }
}

/// A value held once for each venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerLeg<T> {
    pub a: T,
    pub b: T,
}

impl<T> PerLeg<T> {
    pub const fn new(a: T, b: T) -> Self {
        Self { a, b }
    }

    pub const fn get(&self, leg: Leg) -> &T {
        match leg {
            Leg::A => &self.a,
            Leg::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, leg: Leg) -> &mut T {
        match leg {
            Leg::A => &mut self.a,
            Leg::B => &mut self.b,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Leg, T) -> U) -> PerLeg<U> {
        PerLeg {
            a: f(Leg::A, self.a),
            b: f(Leg::B, self.b),
        }
    }
}

// =============================================================================
// Quotes and Samples
// =============================================================================

/// Top of book on a single venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    pub const fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// A quote is usable only when both sides are strictly positive.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Price a taker pays (buy) or receives (sell).
    pub const fn taker_price(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// Simultaneous top-of-book observation on both venues for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadSample {
    pub a: Quote,
    pub b: Quote,
    pub observed_at: DateTime<Utc>,
}

impl SpreadSample {
    pub fn new(a: Quote, b: Quote) -> Self {
        Self {
            a,
            b,
            observed_at: Utc::now(),
        }
    }

    pub const fn quote(&self, leg: Leg) -> &Quote {
        match leg {
            Leg::A => &self.a,
            Leg::B => &self.b,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.a.is_valid() && self.b.is_valid()
    }
}

/// Signed spread, in percent, for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalSpread {
    pub value_pct: Decimal,
    pub direction: Direction,
}

// =============================================================================
// Instruments
// =============================================================================

/// Venue-specific sizing rules for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Decimal places allowed in an order quantity.
    pub quantity_precision: u32,
    /// Units of the base asset represented by one unit of quantity.
    pub contract_size: Decimal,
    /// Smallest quantity the venue accepts.
    pub min_quantity: Decimal,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            quantity_precision: 3,
            contract_size: Decimal::ONE,
            min_quantity: Decimal::ZERO,
        }
    }
}

impl InstrumentSpec {
    pub const fn new(quantity_precision: u32, contract_size: Decimal, min_quantity: Decimal) -> Self {
        Self {
            quantity_precision,
            contract_size,
            min_quantity,
        }
    }

    /// Smallest quantity increment, `10^-precision`.
    pub fn step(&self) -> Decimal {
        Decimal::new(1, self.quantity_precision)
    }

    /// Rounds a quantity toward zero to the venue's precision.
    pub fn floor_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp_with_strategy(self.quantity_precision, RoundingStrategy::ToZero)
    }

    /// USD value of `quantity` at `price`.
    pub fn notional(&self, quantity: Decimal, price: Decimal) -> Decimal {
        quantity * self.contract_size * price
    }

    /// True when the quantity is positive and at or above the venue minimum.
    pub fn accepts(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_quantity
    }
}

/// A tradable contract on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Venue-native symbol, e.g. `BTCUSDT` or `XBTUSDTM`.
    pub symbol: String,
    pub spec: InstrumentSpec,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, spec: InstrumentSpec) -> Self {
        Self {
            symbol: symbol.into(),
            spec,
        }
    }
}

/// A symbol listed on both venues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Venue-independent name, e.g. `BTCUSDT`.
    pub canonical: String,
    pub legs: PerLeg<Instrument>,
}

impl TradingPair {
    pub fn new(canonical: impl Into<String>, a: Instrument, b: Instrument) -> Self {
        Self {
            canonical: canonical.into(),
            legs: PerLeg::new(a, b),
        }
    }

    pub const fn instrument(&self, leg: Leg) -> &Instrument {
        self.legs.get(leg)
    }

    pub fn symbol(&self, leg: Leg) -> &str {
        &self.legs.get(leg).symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== Direction Tests ====================

    #[test]
    fn test_direction_legs() {
        assert_eq!(Direction::LongAShortB.long_leg(), Leg::A);
        assert_eq!(Direction::LongAShortB.short_leg(), Leg::B);
        assert_eq!(Direction::LongBShortA.long_leg(), Leg::B);
        assert_eq!(Direction::LongBShortA.short_leg(), Leg::A);
    }

    #[test]
    fn test_direction_entry_side() {
        let d = Direction::LongBShortA;
        assert_eq!(d.entry_side(Leg::B), Side::Buy);
        assert_eq!(d.entry_side(Leg::A), Side::Sell);
        assert_eq!(d.to_string(), "long B / short A");
    }

    // ==================== Quote Tests ====================

    #[test]
    fn test_quote_validity() {
        assert!(Quote::new(dec!(99), dec!(100)).is_valid());
        assert!(!Quote::new(dec!(0), dec!(100)).is_valid());
        assert!(!Quote::new(dec!(99), dec!(-1)).is_valid());
    }

    #[test]
    fn test_taker_price() {
        let q = Quote::new(dec!(99), dec!(100));
        assert_eq!(q.taker_price(Side::Buy), dec!(100));
        assert_eq!(q.taker_price(Side::Sell), dec!(99));
        assert_eq!(q.mid(), dec!(99.5));
    }

    // ==================== Instrument Tests ====================

    #[test]
    fn test_floor_quantity_rounds_toward_zero() {
        let spec = InstrumentSpec::new(3, dec!(1), dec!(0.001));
        assert_eq!(spec.floor_quantity(dec!(10.0309)), dec!(10.030));
        assert_eq!(spec.step(), dec!(0.001));

        let contracts = InstrumentSpec::new(0, dec!(5), dec!(1));
        assert_eq!(contracts.floor_quantity(dec!(2.99)), dec!(2));
        assert_eq!(contracts.step(), dec!(1));
    }

    #[test]
    fn test_notional_uses_contract_size() {
        let spec = InstrumentSpec::new(0, dec!(5), dec!(1));
        assert_eq!(spec.notional(dec!(2), dec!(9.98)), dec!(99.80));
    }

    #[test]
    fn test_accepts_respects_minimum() {
        let spec = InstrumentSpec::new(0, dec!(1), dec!(1));
        assert!(spec.accepts(dec!(1)));
        assert!(!spec.accepts(dec!(0)));
    }

    #[test]
    fn test_per_leg_map() {
        let legs = PerLeg::new(1, 2).map(|leg, v| format!("{leg}{v}"));
        assert_eq!(legs.get(Leg::A), "A1");
        assert_eq!(legs.get(Leg::B), "B2");
    }
}
