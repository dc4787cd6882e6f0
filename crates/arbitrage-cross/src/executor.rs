//! Paired entry execution across both venues.
//!
//! The coordinator places the long and short legs of an entry together and
//! decides, from the venue-confirmed fills, whether a hedged position exists:
//!
//! - Both orders are submitted concurrently with `tokio::join!`; neither leg
//!   waits on the other's acknowledgement.
//! - When both legs fill, their notionals are compared. A mismatch above the
//!   configured percentage is handed to the [`RebalanceEngine`].
//! - When either leg fails, or the rebalance cannot restore balance, both
//!   venues are flattened from their reported positions. A one-sided
//!   position is never reported as open.
//!
//! # Example
//!
//! ```ignore
//! use spread_arb_cross::executor::{EntryOutcome, EntryPlan, ExecutionCoordinator};
//!
//! let coordinator = ExecutionCoordinator::new(gateways, &config.execution, events);
//! match coordinator.execute(&plan).await {
//!     EntryOutcome::Opened { position, .. } => lifecycle.open_position(position)?,
//!     EntryOutcome::Failed { reason, flatten } => warn!(%reason, flat = flatten.is_flat()),
//! }
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use spread_arb_core::{
    conservative_basis, mismatch_pct, Direction, EventSink, ExecutionConfig, ExecutionSummary,
    GatewayError, Instrument, InstrumentSpec, Leg, LegExecution, LifecycleState, OrderGateway,
    OrderRequest, OrderStatus, PerLeg, Position, PositionLeg, Side, SpreadSample, TradeEvent,
    TradingPair,
};

use crate::flatten::{FlattenConfig, FlattenReport, Flattener};
use crate::matcher::MatchedQuantities;
use crate::rebalance::{RebalanceConfig, RebalanceEngine, RebalanceOutcome};
use crate::spread::realized_spread_pct;

// =============================================================================
// Plans and Fills
// =============================================================================

/// Everything needed to dispatch an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub pair: TradingPair,
    pub direction: Direction,
    pub quantities: MatchedQuantities,
    /// Ask on the long venue when confirmation fired.
    pub long_price: Decimal,
    /// Bid on the short venue when confirmation fired.
    pub short_price: Decimal,
    pub trigger_spread_pct: Decimal,
}

impl EntryPlan {
    /// Builds a plan from the sample that fired entry confirmation.
    pub fn from_trigger(
        pair: TradingPair,
        direction: Direction,
        sample: &SpreadSample,
        trigger_spread_pct: Decimal,
        quantities: MatchedQuantities,
    ) -> Self {
        Self {
            long_price: sample.quote(direction.long_leg()).ask,
            short_price: sample.quote(direction.short_leg()).bid,
            pair,
            direction,
            quantities,
            trigger_spread_pct,
        }
    }
}

/// A venue-confirmed fill for one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFill {
    pub leg: Leg,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub spec: InstrumentSpec,
    pub requested_qty: Decimal,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
    pub expected_price: Decimal,
    pub filled_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl LegFill {
    pub fn notional(&self) -> Decimal {
        self.spec.notional(self.filled_qty, self.avg_price)
    }

    /// Adverse move versus the expected price, in percent. Positive is worse.
    pub fn slippage_pct(&self) -> Decimal {
        if self.expected_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let diff = match self.side {
            Side::Buy => self.avg_price - self.expected_price,
            Side::Sell => self.expected_price - self.avg_price,
        };
        diff / self.expected_price * Decimal::ONE_HUNDRED
    }

    /// Folds an additional same-side fill into this one.
    pub fn absorb(&mut self, qty: Decimal, price: Decimal) {
        let total = self.filled_qty + qty;
        if total <= Decimal::ZERO {
            return;
        }
        self.avg_price = (self.filled_qty * self.avg_price + qty * price) / total;
        self.filled_qty = total;
    }

    pub fn to_execution(&self) -> LegExecution {
        LegExecution {
            leg: self.leg,
            venue: self.venue.clone(),
            side: self.side,
            quantity: self.filled_qty,
            expected_price: self.expected_price,
            fill_price: self.avg_price,
            notional: self.notional(),
            slippage_pct: self.slippage_pct(),
            latency_ms: self.latency_ms,
        }
    }

    pub fn to_position_leg(&self) -> PositionLeg {
        PositionLeg {
            leg: self.leg,
            venue: self.venue.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.filled_qty,
            entry_price: self.avg_price,
            contract_size: self.spec.contract_size,
        }
    }
}

/// Why a single leg did not produce a usable fill.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LegFailure {
    #[error("order placement failed: {0}")]
    Place(GatewayError),

    #[error("fill confirmation failed: {0}")]
    Fill(GatewayError),

    #[error("order ended {status:?} with {filled_qty} filled")]
    NotFilled {
        status: OrderStatus,
        filled_qty: Decimal,
    },
}

impl LegFailure {
    /// True if the order may still fill after the failure was observed.
    pub fn is_unsettled(&self) -> bool {
        match self {
            Self::Place(_) => false,
            Self::Fill(_) => true,
            Self::NotFilled { status, .. } => !status.is_terminal(),
        }
    }
}

/// Result of an entry attempt.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// Both legs filled and reconciled.
    Opened {
        position: Position,
        summary: ExecutionSummary,
    },
    /// No hedged position exists; both venues were flattened.
    Failed {
        reason: String,
        flatten: FlattenReport,
    },
}

impl EntryOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, Self::Opened { .. })
    }

    /// True if a failed entry may have left exposure behind.
    pub fn has_exposure(&self) -> bool {
        match self {
            Self::Opened { .. } => false,
            Self::Failed { flatten, .. } => !flatten.is_flat(),
        }
    }
}

// =============================================================================
// Execution Coordinator
// =============================================================================

/// Submits, reconciles and if necessary unwinds paired entries.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    gateways: PerLeg<Arc<dyn OrderGateway>>,
    config: ExecutionConfig,
    rebalancer: RebalanceEngine,
    flattener: Flattener,
    events: EventSink,
}

impl ExecutionCoordinator {
    pub fn new(
        gateways: PerLeg<Arc<dyn OrderGateway>>,
        config: &ExecutionConfig,
        events: EventSink,
    ) -> Self {
        Self {
            rebalancer: RebalanceEngine::new(gateways.clone(), RebalanceConfig::from(config)),
            flattener: Flattener::new(gateways.clone(), FlattenConfig::from(config)),
            gateways,
            config: config.clone(),
            events,
        }
    }

    pub fn flattener(&self) -> &Flattener {
        &self.flattener
    }

    /// Executes both legs of `plan` and returns the reconciled outcome.
    pub async fn execute(&self, plan: &EntryPlan) -> EntryOutcome {
        let long_leg = plan.direction.long_leg();
        let short_leg = plan.direction.short_leg();

        info!(
            symbol = %plan.pair.canonical,
            direction = %plan.direction,
            long_qty = %plan.quantities.long_qty,
            short_qty = %plan.quantities.short_qty,
            trigger_spread = %plan.trigger_spread_pct.round_dp(4),
            "Dispatching entry legs"
        );

        let (long, short) = tokio::join!(
            self.dispatch_leg(
                long_leg,
                plan.pair.instrument(long_leg),
                Side::Buy,
                plan.quantities.long_qty,
                plan.long_price,
            ),
            self.dispatch_leg(
                short_leg,
                plan.pair.instrument(short_leg),
                Side::Sell,
                plan.quantities.short_qty,
                plan.short_price,
            ),
        );

        match (long, short) {
            (Ok(long), Ok(short)) => self.reconcile(plan, long, short).await,
            (long, short) => {
                let describe = |r: &Result<LegFill, LegFailure>| match r {
                    Ok(_) => "filled".to_string(),
                    Err(e) => e.to_string(),
                };
                let reason = format!("long: {}; short: {}", describe(&long), describe(&short));
                error!(
                    symbol = %plan.pair.canonical,
                    reason = %reason,
                    "Entry leg failed, flattening both venues"
                );
                let mut unsettled = PerLeg::<bool>::default();
                *unsettled.get_mut(long_leg) = long.as_ref().is_err_and(LegFailure::is_unsettled);
                *unsettled.get_mut(short_leg) =
                    short.as_ref().is_err_and(LegFailure::is_unsettled);
                let flatten = self
                    .flattener
                    .flatten_pair_settling(&plan.pair, unsettled)
                    .await;
                EntryOutcome::Failed { reason, flatten }
            }
        }
    }

    async fn dispatch_leg(
        &self,
        leg: Leg,
        instrument: &Instrument,
        side: Side,
        quantity: Decimal,
        expected_price: Decimal,
    ) -> Result<LegFill, LegFailure> {
        let gateway = self.gateways.get(leg);
        let started = Instant::now();

        let order = OrderRequest::market(&instrument.symbol, side, quantity);
        let handle = gateway
            .place_market_order(&order)
            .await
            .map_err(LegFailure::Place)?;
        let report = gateway
            .await_fill(&handle, self.config.order_timeout())
            .await
            .map_err(LegFailure::Fill)?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let avg_price = match report.avg_price {
            Some(price) if report.is_filled() => price,
            _ => {
                warn!(
                    venue = gateway.venue(),
                    symbol = %instrument.symbol,
                    status = ?report.status,
                    filled = %report.filled_qty,
                    "Entry order did not fill"
                );
                return Err(LegFailure::NotFilled {
                    status: report.status,
                    filled_qty: report.filled_qty,
                });
            }
        };

        let fill = LegFill {
            leg,
            venue: gateway.venue().to_string(),
            symbol: instrument.symbol.clone(),
            side,
            spec: instrument.spec,
            requested_qty: quantity,
            filled_qty: report.filled_qty,
            avg_price,
            expected_price,
            filled_at: report.filled_at.unwrap_or_else(Utc::now),
            latency_ms,
        };

        info!(
            venue = %fill.venue,
            symbol = %fill.symbol,
            side = %side,
            qty = %fill.filled_qty,
            expected = %expected_price,
            fill = %avg_price,
            slippage_pct = %fill.slippage_pct().round_dp(4),
            latency_ms,
            "Entry leg filled"
        );
        Ok(fill)
    }

    async fn reconcile(&self, plan: &EntryPlan, mut long: LegFill, mut short: LegFill) -> EntryOutcome {
        let initial_mismatch = mismatch_pct(long.notional(), short.notional());
        let mut rebalanced = false;

        if initial_mismatch > self.config.max_mismatch_pct {
            warn!(
                symbol = %plan.pair.canonical,
                long_notional = %long.notional().round_dp(4),
                short_notional = %short.notional().round_dp(4),
                mismatch_pct = %initial_mismatch.round_dp(4),
                "Filled notionals diverge, rebalancing"
            );
            match self.rebalancer.rebalance(&mut long, &mut short).await {
                RebalanceOutcome::Dust { gap_usd } => {
                    info!(gap_usd = %gap_usd.round_dp(4), "Notional gap below minimum order, accepted");
                }
                RebalanceOutcome::Balanced { leg, added_qty, .. } => {
                    rebalanced = true;
                    info!(leg = %leg, added_qty = %added_qty, "Rebalance restored notional match");
                }
                RebalanceOutcome::Failed { reason } => {
                    error!(
                        symbol = %plan.pair.canonical,
                        reason = %reason,
                        "Rebalance failed, flattening both venues"
                    );
                    let flatten = self.flattener.flatten_pair(&plan.pair).await;
                    return EntryOutcome::Failed {
                        reason: format!("rebalance failed: {reason}"),
                        flatten,
                    };
                }
            }
        }

        let realized = realized_spread_pct(long.avg_price, short.avg_price)
            .unwrap_or(plan.trigger_spread_pct);
        let basis = conservative_basis(plan.trigger_spread_pct, realized);

        let position = Position {
            id: Uuid::new_v4(),
            symbol: plan.pair.canonical.clone(),
            direction: plan.direction,
            long: long.to_position_leg(),
            short: short.to_position_leg(),
            trigger_spread_pct: plan.trigger_spread_pct,
            realized_spread_pct: realized,
            entry_basis_pct: basis,
            opened_at: Utc::now(),
            state: LifecycleState::Entering,
        };

        let summary = ExecutionSummary {
            position_id: position.id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            long: long.to_execution(),
            short: short.to_execution(),
            trigger_spread_pct: plan.trigger_spread_pct,
            realized_spread_pct: realized,
            entry_basis_pct: basis,
            notional_mismatch_pct: position.notional_mismatch_pct(),
            rebalanced,
        };

        info!(
            symbol = %summary.symbol,
            direction = %summary.direction,
            long_notional = %summary.long.notional.round_dp(4),
            short_notional = %summary.short.notional.round_dp(4),
            trigger = %summary.trigger_spread_pct.round_dp(4),
            realized = %summary.realized_spread_pct.round_dp(4),
            basis = %summary.entry_basis_pct.round_dp(4),
            "ENTRY COMPLETE"
        );
        self.events.emit(TradeEvent::ExecutionSummary(summary.clone()));

        EntryOutcome::Opened { position, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperGateway, PaperGatewayConfig};
    use crate::testkit::ScriptedFeed;
    use rust_decimal_macros::dec;
    use spread_arb_core::Quote;

    struct Harness {
        a: Arc<PaperGateway>,
        b: Arc<PaperGateway>,
        coordinator: ExecutionCoordinator,
        pair: TradingPair,
    }

    fn harness(a_spec: InstrumentSpec, b_spec: InstrumentSpec) -> Harness {
        let feed_a = Arc::new(ScriptedFeed::new("a"));
        let feed_b = Arc::new(ScriptedFeed::new("b"));
        feed_a.set_quote("ETHUSDT", dec!(9.99), dec!(10));
        feed_b.set_quote("ETHUSDTM", dec!(10.5), dec!(10.51));

        let a = Arc::new(PaperGateway::new("a", feed_a, PaperGatewayConfig::always_fill()));
        let b = Arc::new(PaperGateway::new("b", feed_b, PaperGatewayConfig::always_fill()));
        let gateways = PerLeg::new(
            a.clone() as Arc<dyn OrderGateway>,
            b.clone() as Arc<dyn OrderGateway>,
        );

        let config = ExecutionConfig {
            order_timeout_ms: 50,
            close_timeout_ms: 200,
            close_poll_ms: 5,
            ..ExecutionConfig::default()
        };
        Harness {
            a,
            b,
            coordinator: ExecutionCoordinator::new(gateways, &config, EventSink::disabled()),
            pair: TradingPair::new(
                "ETHUSDT",
                Instrument::new("ETHUSDT", a_spec),
                Instrument::new("ETHUSDTM", b_spec),
            ),
        }
    }

    fn plan(pair: &TradingPair, long_qty: Decimal, short_qty: Decimal) -> EntryPlan {
        let sample = SpreadSample::new(Quote::new(dec!(9.99), dec!(10)), Quote::new(dec!(10.5), dec!(10.51)));
        EntryPlan::from_trigger(
            pair.clone(),
            Direction::LongAShortB,
            &sample,
            dec!(5),
            MatchedQuantities {
                long_qty,
                short_qty,
                long_notional: long_qty * dec!(10),
                short_notional: short_qty * dec!(10.5),
            },
        )
    }

    // ==================== Success Path Tests ====================

    #[tokio::test]
    async fn test_both_legs_fill_opens_position() {
        let h = harness(InstrumentSpec::new(3, dec!(1), dec!(0.001)), InstrumentSpec::new(3, dec!(1), dec!(0.001)));
        let p = plan(&h.pair, dec!(5), dec!(4.762));

        let outcome = h.coordinator.execute(&p).await;
        let EntryOutcome::Opened { position, summary } = outcome else {
            panic!("expected open position");
        };
        assert_eq!(position.long.quantity, dec!(5));
        assert_eq!(position.short.quantity, dec!(4.762));
        assert_eq!(position.realized_spread_pct, dec!(5));
        assert_eq!(position.entry_basis_pct, dec!(5));
        assert!(!summary.rebalanced);
        assert_eq!(h.a.position("ETHUSDT"), dec!(5));
        assert_eq!(h.b.position("ETHUSDTM"), dec!(-4.762));
    }

    #[tokio::test]
    async fn test_basis_uses_worse_of_trigger_and_realized() {
        let h = harness(InstrumentSpec::new(3, dec!(1), dec!(0.001)), InstrumentSpec::new(3, dec!(1), dec!(0.001)));
        // Long fills worse than the trigger ask.
        h.a.queue_fill_price(dec!(10.05));
        let p = plan(&h.pair, dec!(5), dec!(4.786));

        let EntryOutcome::Opened { position, .. } = h.coordinator.execute(&p).await else {
            panic!("expected open position");
        };
        assert!(position.realized_spread_pct < dec!(5));
        assert_eq!(position.entry_basis_pct, position.realized_spread_pct);
        assert_eq!(position.trigger_spread_pct, dec!(5));
    }

    // ==================== Failure Path Tests ====================

    #[tokio::test]
    async fn test_rejected_leg_flattens_filled_leg() {
        let h = harness(InstrumentSpec::new(3, dec!(1), dec!(0.001)), InstrumentSpec::new(3, dec!(1), dec!(0.001)));
        h.b.reject_next(1);
        let p = plan(&h.pair, dec!(5), dec!(4.762));

        let outcome = h.coordinator.execute(&p).await;
        assert!(!outcome.is_opened());
        assert!(!outcome.has_exposure());
        assert_eq!(h.a.position("ETHUSDT"), Decimal::ZERO);
        assert_eq!(h.b.position("ETHUSDTM"), Decimal::ZERO);

        let closes: Vec<_> = h.a.orders().into_iter().filter(|o| o.request.reduce_only).collect();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].request.side, Side::Sell);
    }

    #[tokio::test]
    async fn test_fill_timeout_flattens() {
        let h = harness(InstrumentSpec::new(3, dec!(1), dec!(0.001)), InstrumentSpec::new(3, dec!(1), dec!(0.001)));
        h.a.stall_next(1);
        let p = plan(&h.pair, dec!(5), dec!(4.762));

        let outcome = h.coordinator.execute(&p).await;
        let EntryOutcome::Failed { reason, flatten } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("fill confirmation failed"));
        assert!(flatten.is_flat());
        assert_eq!(h.b.position("ETHUSDTM"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_both_legs_rejected_leaves_nothing() {
        let h = harness(InstrumentSpec::new(3, dec!(1), dec!(0.001)), InstrumentSpec::new(3, dec!(1), dec!(0.001)));
        h.a.reject_next(1);
        h.b.reject_next(1);
        let outcome = h.coordinator.execute(&plan(&h.pair, dec!(5), dec!(4.762))).await;
        let EntryOutcome::Failed { flatten, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(flatten.leg(Leg::A).status, crate::flatten::FlattenStatus::AlreadyFlat);
        assert_eq!(flatten.leg(Leg::B).status, crate::flatten::FlattenStatus::AlreadyFlat);
    }

    #[test]
    fn test_unsettled_leg_failures() {
        let timeout = GatewayError::timeout("a");
        assert!(LegFailure::Fill(timeout.clone()).is_unsettled());
        assert!(!LegFailure::Place(timeout).is_unsettled());
        assert!(LegFailure::NotFilled {
            status: OrderStatus::PartiallyFilled,
            filled_qty: dec!(1),
        }
        .is_unsettled());
        assert!(!LegFailure::NotFilled {
            status: OrderStatus::Cancelled,
            filled_qty: Decimal::ZERO,
        }
        .is_unsettled());
    }

    // ==================== Fill Math Tests ====================

    #[test]
    fn test_slippage_sign() {
        let mut fill = LegFill {
            leg: Leg::A,
            venue: "a".to_string(),
            symbol: "X".to_string(),
            side: Side::Buy,
            spec: InstrumentSpec::default(),
            requested_qty: dec!(1),
            filled_qty: dec!(1),
            avg_price: dec!(101),
            expected_price: dec!(100),
            filled_at: Utc::now(),
            latency_ms: 3,
        };
        assert_eq!(fill.slippage_pct(), dec!(1));
        fill.side = Side::Sell;
        assert_eq!(fill.slippage_pct(), dec!(-1));
    }

    #[test]
    fn test_absorb_recomputes_average() {
        let mut fill = LegFill {
            leg: Leg::B,
            venue: "b".to_string(),
            symbol: "X".to_string(),
            side: Side::Sell,
            spec: InstrumentSpec::default(),
            requested_qty: dec!(10),
            filled_qty: dec!(10),
            avg_price: dec!(4.92),
            expected_price: dec!(4.92),
            filled_at: Utc::now(),
            latency_ms: 3,
        };
        fill.absorb(dec!(10), dec!(5.08));
        assert_eq!(fill.filled_qty, dec!(20));
        assert_eq!(fill.avg_price, dec!(5));
    }
}
