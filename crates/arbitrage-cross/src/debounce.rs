//! N-consecutive confirmation of a spread condition.
//!
//! Entry and exit decisions are never made on a single observation. A
//! [`ConfirmationDebouncer`] counts consecutive passing observations and
//! fires once the count reaches its threshold. Any failing or unavailable
//! observation resets the count to zero; an abort observation ends the
//! sequence immediately.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Classification of a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Observation {
    /// The condition holds.
    Pass,
    /// The condition does not hold.
    Fail,
    /// The condition is irrecoverably broken, e.g. the spread collapsed.
    Abort,
    /// No usable data this poll. Treated like [`Observation::Fail`].
    Unavailable,
}

/// Result of feeding one observation to the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebounceOutcome {
    /// Still counting; `count` consecutive passes so far.
    Progress { count: u32 },
    /// Count dropped back to zero from `previous`.
    Reset { previous: u32 },
    /// Threshold reached. The count is cleared.
    Fired,
    /// Abort observed after `previous` consecutive passes.
    Aborted { previous: u32 },
}

/// Consecutive-pass counter with a firing threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationDebouncer {
    count: u32,
    threshold: u32,
}

impl ConfirmationDebouncer {
    /// Creates a debouncer. A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn observe(&mut self, observation: Observation) -> DebounceOutcome {
        match observation {
            Observation::Pass => {
                self.count += 1;
                if self.count >= self.threshold {
                    self.count = 0;
                    DebounceOutcome::Fired
                } else {
                    DebounceOutcome::Progress { count: self.count }
                }
            }
            Observation::Fail | Observation::Unavailable => {
                let previous = std::mem::take(&mut self.count);
                DebounceOutcome::Reset { previous }
            }
            Observation::Abort => {
                let previous = std::mem::take(&mut self.count);
                DebounceOutcome::Aborted { previous }
            }
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Entry condition for a committed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCondition {
    pub entry_spread_pct: Decimal,
    pub abort_spread_pct: Decimal,
}

impl EntryCondition {
    pub fn classify(&self, spread_pct: Option<Decimal>) -> Observation {
        match spread_pct {
            None => Observation::Unavailable,
            Some(s) if s < self.abort_spread_pct => Observation::Abort,
            Some(s) if s >= self.entry_spread_pct => Observation::Pass,
            Some(_) => Observation::Fail,
        }
    }
}

/// Exit condition for an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCondition {
    pub profit_target_pct: Decimal,
    pub epsilon_pct: Decimal,
}

impl ExitCondition {
    /// Passes when the captured spread reached the target or the exit
    /// spread has converged to within epsilon of zero.
    pub fn classify(&self, captured_pct: Decimal, exit_spread_pct: Decimal) -> Observation {
        if captured_pct >= self.profit_target_pct || exit_spread_pct.abs() < self.epsilon_pct {
            Observation::Pass
        } else {
            Observation::Fail
        }
    }
}
