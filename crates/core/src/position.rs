use crate::types::{Direction, Leg, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// States of the single-position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    EntryConfirming,
    Entering,
    Open,
    ExitConfirming,
    Closing,
    ForceClosing,
}

impl LifecycleState {
    /// True while both legs may carry exposure.
    pub const fn has_exposure(&self) -> bool {
        matches!(
            self,
            Self::Entering | Self::Open | Self::ExitConfirming | Self::Closing | Self::ForceClosing
        )
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::EntryConfirming)
                | (Self::EntryConfirming, Self::Entering)
                | (Self::EntryConfirming, Self::Idle)
                | (Self::Entering, Self::Open)
                | (Self::Entering, Self::Idle)
                | (Self::Open, Self::ExitConfirming)
                | (Self::Open, Self::Closing)
                | (Self::Open, Self::ForceClosing)
                | (Self::ExitConfirming, Self::Open)
                | (Self::ExitConfirming, Self::Closing)
                | (Self::ExitConfirming, Self::ForceClosing)
                | (Self::Closing, Self::Idle)
                | (Self::ForceClosing, Self::Idle)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::EntryConfirming => "ENTRY_CONFIRMING",
            Self::Entering => "ENTERING",
            Self::Open => "OPEN",
            Self::ExitConfirming => "EXIT_CONFIRMING",
            Self::Closing => "CLOSING",
            Self::ForceClosing => "FORCE_CLOSING",
        };
        write!(f, "{name}")
    }
}

/// One filled side of an open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLeg {
    pub leg: Leg,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub contract_size: Decimal,
}

impl PositionLeg {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.contract_size * self.entry_price
    }

    /// Position size as reported by the venue: positive long, negative short.
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * self.side.sign()
    }
}

/// The one open two-legged position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Canonical symbol shared by both legs.
    pub symbol: String,
    pub direction: Direction,
    pub long: PositionLeg,
    pub short: PositionLeg,
    /// Spread observed when entry confirmation fired.
    pub trigger_spread_pct: Decimal,
    /// Spread implied by the actual fill prices.
    pub realized_spread_pct: Decimal,
    /// Basis used for captured-spread accounting.
    pub entry_basis_pct: Decimal,
    pub opened_at: DateTime<Utc>,
    pub state: LifecycleState,
}

impl Position {
    pub fn leg(&self, leg: Leg) -> &PositionLeg {
        if self.long.leg == leg {
            &self.long
        } else {
            &self.short
        }
    }

    pub fn notional_mismatch(&self) -> Decimal {
        (self.long.notional() - self.short.notional()).abs()
    }

    pub fn notional_mismatch_pct(&self) -> Decimal {
        mismatch_pct(self.long.notional(), self.short.notional())
    }
}

/// `|a - b| / max(a, b) * 100`, zero when both sides are empty.
pub fn mismatch_pct(a: Decimal, b: Decimal) -> Decimal {
    let larger = a.max(b);
    if larger <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (a - b).abs() / larger * Decimal::ONE_HUNDRED
}

/// Entry basis used for accounting: the lesser of the triggering spread and
/// the spread realized by the fills.
pub fn conservative_basis(trigger_pct: Decimal, realized_pct: Decimal) -> Decimal {
    trigger_pct.min(realized_pct)
}
