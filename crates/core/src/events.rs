use crate::position::LifecycleState;
use crate::types::{Direction, Leg, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Structured notifications emitted while a trade progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEvent {
    EntryConfirmProgress {
        symbol: String,
        direction: Direction,
        count: u32,
        threshold: u32,
        spread_pct: Decimal,
        timestamp: DateTime<Utc>,
    },
    EntryAborted {
        symbol: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionSummary(ExecutionSummary),
    ExitConfirmProgress {
        symbol: String,
        count: u32,
        threshold: u32,
        captured_pct: Decimal,
        exit_spread_pct: Decimal,
        timestamp: DateTime<Utc>,
    },
    TradeClosed(TradeSummary),
    LiquidationDetected {
        symbol: String,
        leg: Leg,
        venue: String,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
        timestamp: DateTime<Utc>,
    },
}

/// Per-leg fill statistics for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegExecution {
    pub leg: Leg,
    pub venue: String,
    pub side: Side,
    pub quantity: Decimal,
    pub expected_price: Decimal,
    pub fill_price: Decimal,
    pub notional: Decimal,
    /// Adverse price move versus the expected price, as a percentage.
    pub slippage_pct: Decimal,
    pub latency_ms: u64,
}

/// Emitted once both legs of an entry are filled and reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub position_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub long: LegExecution,
    pub short: LegExecution,
    pub trigger_spread_pct: Decimal,
    pub realized_spread_pct: Decimal,
    pub entry_basis_pct: Decimal,
    pub notional_mismatch_pct: Decimal,
    pub rebalanced: bool,
}

/// Accounting for a finished trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub position_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_basis_pct: Decimal,
    pub exit_spread_pct: Option<Decimal>,
    pub captured_spread_pct: Option<Decimal>,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub funding: Decimal,
    pub net_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// True when the position was closed by the liquidation watcher.
    pub forced: bool,
}

/// Optional channel that receives [`TradeEvent`]s.
///
/// Emitting never blocks and never fails; a missing or closed receiver just
/// drops the event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TradeEvent>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TradeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: TradeEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
