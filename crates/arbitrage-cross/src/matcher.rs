//! Equal-notional sizing across venues with different lot rules.
//!
//! Each venue quantizes order size differently: one may trade base units to
//! three decimals, the other whole contracts of 5 units. The matcher turns a
//! USD target into one quantity per leg such that
//!
//! - quantities are rounded down to each venue's precision,
//! - neither leg's notional exceeds the target,
//! - the two notionals differ by at most the tolerance.
//!
//! Matching is pure: identical inputs always produce identical outputs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use spread_arb_core::InstrumentSpec;

/// Which side of the pair a sizing error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("invalid sizing input: target {target}, long price {long_price}, short price {short_price}")]
    InvalidInput {
        target: Decimal,
        long_price: Decimal,
        short_price: Decimal,
    },

    #[error("{side:?} quantity {quantity} is below the venue minimum {minimum}")]
    QuantityBelowMinimum {
        side: PairSide,
        quantity: Decimal,
        minimum: Decimal,
    },

    #[error("notionals did not converge within {iterations} steps (long ${long}, short ${short})")]
    NoConvergence {
        iterations: u32,
        long: Decimal,
        short: Decimal,
    },
}

/// Quantities chosen for both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedQuantities {
    pub long_qty: Decimal,
    pub short_qty: Decimal,
    pub long_notional: Decimal,
    pub short_notional: Decimal,
}

impl MatchedQuantities {
    pub fn mismatch(&self) -> Decimal {
        (self.long_notional - self.short_notional).abs()
    }
}

/// Sizes both legs to a common USD notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotionalMatcher {
    /// Largest acceptable absolute notional difference.
    pub tolerance_usd: Decimal,
    /// Bound on precision-step adjustments.
    pub max_iterations: u32,
}

impl Default for NotionalMatcher {
    fn default() -> Self {
        Self {
            tolerance_usd: Decimal::new(50, 2),
            max_iterations: 100_000,
        }
    }
}

impl NotionalMatcher {
    pub const fn new(tolerance_usd: Decimal, max_iterations: u32) -> Self {
        Self {
            tolerance_usd,
            max_iterations,
        }
    }

    /// Computes per-leg quantities for `target_usd`.
    ///
    /// Both legs start from the same base amount, `target / mid`, where mid
    /// is the average of the two trigger prices. Each leg is then capped so
    /// its notional does not exceed the target, and finally the larger leg
    /// is stepped down one precision unit at a time until the notionals
    /// agree within tolerance.
    ///
    /// # Errors
    ///
    /// - [`MatchError::InvalidInput`] for non-positive target or prices.
    /// - [`MatchError::QuantityBelowMinimum`] when a leg rounds to zero or
    ///   below its venue minimum.
    /// - [`MatchError::NoConvergence`] when the step bound is exhausted.
    pub fn match_notional(
        &self,
        target_usd: Decimal,
        long_price: Decimal,
        short_price: Decimal,
        long_spec: &InstrumentSpec,
        short_spec: &InstrumentSpec,
    ) -> Result<MatchedQuantities, MatchError> {
        if target_usd <= Decimal::ZERO || long_price <= Decimal::ZERO || short_price <= Decimal::ZERO
        {
            return Err(MatchError::InvalidInput {
                target: target_usd,
                long_price,
                short_price,
            });
        }

        let reference = (long_price + short_price) / Decimal::TWO;
        let base = target_usd / reference;

        let mut long_qty = initial_quantity(base, target_usd, long_price, long_spec);
        let mut short_qty = initial_quantity(base, target_usd, short_price, short_spec);

        for _ in 0..self.max_iterations {
            check_minimum(PairSide::Long, long_qty, long_spec)?;
            check_minimum(PairSide::Short, short_qty, short_spec)?;

            let long_notional = long_spec.notional(long_qty, long_price);
            let short_notional = short_spec.notional(short_qty, short_price);

            if (long_notional - short_notional).abs() <= self.tolerance_usd {
                return Ok(MatchedQuantities {
                    long_qty,
                    short_qty,
                    long_notional,
                    short_notional,
                });
            }

            if long_notional > short_notional {
                long_qty -= long_spec.step();
            } else {
                short_qty -= short_spec.step();
            }
        }

        Err(MatchError::NoConvergence {
            iterations: self.max_iterations,
            long: long_spec.notional(long_qty, long_price),
            short: short_spec.notional(short_qty, short_price),
        })
    }
}

/// Base amount converted to venue units, floored, and capped at the target.
fn initial_quantity(base: Decimal, target: Decimal, price: Decimal, spec: &InstrumentSpec) -> Decimal {
    if spec.contract_size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let from_base = spec.floor_quantity(base / spec.contract_size);
    // Largest quantity whose notional stays at or under the target.
    let cap = spec.floor_quantity(target / (spec.contract_size * price));
    from_base.min(cap)
}

fn check_minimum(side: PairSide, quantity: Decimal, spec: &InstrumentSpec) -> Result<(), MatchError> {
    if spec.accepts(quantity) {
        Ok(())
    } else {
        Err(MatchError::QuantityBelowMinimum {
            side,
            quantity,
            minimum: spec.min_quantity.max(spec.step()),
        })
    }
}
