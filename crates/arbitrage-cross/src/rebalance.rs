//! Post-fill notional rebalancing.
//!
//! Market orders fill at whatever the book offers, so two legs sized to the
//! same notional can come back a few dollars apart. The rebalance engine
//! tops up the under-sized leg with a same-direction order sized to the gap.
//! Gaps below the minimum order value are accepted as dust. If the top-up
//! cannot be placed, or still leaves the legs out of tolerance, the outcome
//! is `Failed` and the caller must flatten.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use spread_arb_core::{mismatch_pct, ExecutionConfig, Leg, OrderGateway, OrderRequest, PerLeg};

use crate::executor::LegFill;
use crate::matcher::PairSide;

/// Tolerances for rebalancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Gaps below this are not worth an order.
    pub min_order_usd: Decimal,
    /// Absolute notional difference accepted after a top-up.
    pub tolerance_usd: Decimal,
    /// Relative notional difference accepted after a top-up.
    pub max_mismatch_pct: Decimal,
    pub order_timeout: Duration,
}

impl From<&ExecutionConfig> for RebalanceConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            min_order_usd: config.min_rebalance_usd,
            tolerance_usd: config.match_tolerance_usd,
            max_mismatch_pct: config.max_mismatch_pct,
            order_timeout: config.order_timeout(),
        }
    }
}

impl RebalanceConfig {
    pub fn within_tolerance(&self, long_notional: Decimal, short_notional: Decimal) -> bool {
        (long_notional - short_notional).abs() <= self.tolerance_usd
            || mismatch_pct(long_notional, short_notional) <= self.max_mismatch_pct
    }
}

/// The order a rebalance would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalancePlan {
    /// Gap smaller than the minimum order value.
    Dust { gap_usd: Decimal },
    /// Top up `side` by `quantity`.
    TopUp {
        side: PairSide,
        quantity: Decimal,
        gap_usd: Decimal,
    },
    /// Gap is worth closing but rounds to less than one venue step.
    Unfillable { side: PairSide, gap_usd: Decimal },
}

/// Result of a rebalance attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceOutcome {
    Dust {
        gap_usd: Decimal,
    },
    Balanced {
        leg: Leg,
        added_qty: Decimal,
        fill_price: Decimal,
        remaining_gap_usd: Decimal,
    },
    Failed {
        reason: String,
    },
}

/// Plans the top-up order for a pair of fills. Pure.
pub fn plan_rebalance(long: &LegFill, short: &LegFill, min_order_usd: Decimal) -> RebalancePlan {
    let long_notional = long.notional();
    let short_notional = short.notional();
    let gap_usd = (long_notional - short_notional).abs();

    if gap_usd < min_order_usd {
        return RebalancePlan::Dust { gap_usd };
    }

    let (side, under) = if long_notional < short_notional {
        (PairSide::Long, long)
    } else {
        (PairSide::Short, short)
    };

    let unit_value = under.spec.contract_size * under.avg_price;
    let quantity = if unit_value > Decimal::ZERO {
        under.spec.floor_quantity(gap_usd / unit_value)
    } else {
        Decimal::ZERO
    };

    if quantity <= Decimal::ZERO || quantity < under.spec.min_quantity {
        return RebalancePlan::Unfillable { side, gap_usd };
    }
    RebalancePlan::TopUp {
        side,
        quantity,
        gap_usd,
    }
}

/// Sends top-up orders to close notional gaps.
#[derive(Clone)]
pub struct RebalanceEngine {
    gateways: PerLeg<Arc<dyn OrderGateway>>,
    config: RebalanceConfig,
}

impl RebalanceEngine {
    pub fn new(gateways: PerLeg<Arc<dyn OrderGateway>>, config: RebalanceConfig) -> Self {
        Self { gateways, config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Attempts to equalize the two fills. On success the under-sized fill
    /// is updated in place with its new quantity and average price.
    pub async fn rebalance(&self, long: &mut LegFill, short: &mut LegFill) -> RebalanceOutcome {
        let (side, quantity, gap_usd) = match plan_rebalance(long, short, self.config.min_order_usd) {
            RebalancePlan::Dust { gap_usd } => return RebalanceOutcome::Dust { gap_usd },
            RebalancePlan::Unfillable { side, gap_usd } => {
                return RebalanceOutcome::Failed {
                    reason: format!("{side:?} gap ${gap_usd} is below one venue quantity step"),
                };
            }
            RebalancePlan::TopUp {
                side,
                quantity,
                gap_usd,
            } => (side, quantity, gap_usd),
        };

        let under = match side {
            PairSide::Long => &mut *long,
            PairSide::Short => &mut *short,
        };
        let gateway = self.gateways.get(under.leg);

        info!(
            venue = %under.venue,
            symbol = %under.symbol,
            side = %under.side,
            qty = %quantity,
            gap_usd = %gap_usd.round_dp(4),
            "Placing rebalance order"
        );

        let order = OrderRequest::market(&under.symbol, under.side, quantity);
        let fill = match gateway.place_market_order(&order).await {
            Ok(handle) => gateway.await_fill(&handle, self.config.order_timeout).await,
            Err(e) => Err(e),
        };

        let (added_qty, fill_price) = match fill {
            Ok(report) if report.is_filled() => match report.avg_price {
                Some(price) => (report.filled_qty, price),
                None => {
                    return RebalanceOutcome::Failed {
                        reason: "rebalance fill has no price".to_string(),
                    }
                }
            },
            Ok(report) => {
                return RebalanceOutcome::Failed {
                    reason: format!("rebalance order ended {:?}", report.status),
                }
            }
            Err(e) => {
                warn!(venue = %under.venue, error = %e, "Rebalance order failed");
                return RebalanceOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let leg = under.leg;
        under.absorb(added_qty, fill_price);

        let long_notional = long.notional();
        let short_notional = short.notional();
        let remaining_gap_usd = (long_notional - short_notional).abs();

        if self.config.within_tolerance(long_notional, short_notional) {
            RebalanceOutcome::Balanced {
                leg,
                added_qty,
                fill_price,
                remaining_gap_usd,
            }
        } else {
            RebalanceOutcome::Failed {
                reason: format!("still ${remaining_gap_usd} apart after rebalance"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperGateway, PaperGatewayConfig};
    use crate::testkit::ScriptedFeed;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use spread_arb_core::{InstrumentSpec, Side};

    fn fill(leg: Leg, side: Side, qty: Decimal, price: Decimal) -> LegFill {
        LegFill {
            leg,
            venue: format!("venue-{leg}"),
            symbol: "SOLUSDT".to_string(),
            side,
            spec: InstrumentSpec::new(3, dec!(1), dec!(0.001)),
            requested_qty: qty,
            filled_qty: qty,
            avg_price: price,
            expected_price: price,
            filled_at: Utc::now(),
            latency_ms: 1,
        }
    }

    fn config() -> RebalanceConfig {
        RebalanceConfig {
            min_order_usd: dec!(0.50),
            tolerance_usd: dec!(0.50),
            max_mismatch_pct: dec!(0.5),
            order_timeout: Duration::from_millis(50),
        }
    }

    fn engine(feed_price: Decimal) -> (RebalanceEngine, Arc<PaperGateway>) {
        let feed = Arc::new(ScriptedFeed::new("b"));
        feed.set_quote("SOLUSDT", feed_price, feed_price);
        let gateway = Arc::new(PaperGateway::new("b", feed, PaperGatewayConfig::always_fill()));
        let gateways = PerLeg::new(
            gateway.clone() as Arc<dyn OrderGateway>,
            gateway.clone() as Arc<dyn OrderGateway>,
        );
        (RebalanceEngine::new(gateways, config()), gateway)
    }

    // ==================== Planning Tests ====================

    #[test]
    fn test_plan_tops_up_under_sized_leg() {
        // $50.00 vs $49.20
        let long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let short = fill(Leg::B, Side::Sell, dec!(10), dec!(4.92));
        let plan = plan_rebalance(&long, &short, dec!(0.50));
        assert_eq!(
            plan,
            RebalancePlan::TopUp {
                side: PairSide::Short,
                quantity: dec!(0.162),
                gap_usd: dec!(0.80),
            }
        );
    }

    #[test]
    fn test_plan_small_gap_is_dust() {
        let long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let short = fill(Leg::B, Side::Sell, dec!(10), dec!(4.96));
        assert_eq!(
            plan_rebalance(&long, &short, dec!(0.50)),
            RebalancePlan::Dust { gap_usd: dec!(0.40) }
        );
    }

    #[test]
    fn test_plan_gap_below_one_step_is_unfillable() {
        let long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let mut short = fill(Leg::B, Side::Sell, dec!(1), dec!(49.20));
        short.spec = InstrumentSpec::new(0, dec!(1), dec!(1));
        assert!(matches!(
            plan_rebalance(&long, &short, dec!(0.50)),
            RebalancePlan::Unfillable { side: PairSide::Short, .. }
        ));
    }

    // ==================== Execution Tests ====================

    #[tokio::test]
    async fn test_rebalance_restores_match() {
        let (engine, gateway) = engine(dec!(4.92));
        let mut long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let mut short = fill(Leg::B, Side::Sell, dec!(10), dec!(4.92));

        let outcome = engine.rebalance(&mut long, &mut short).await;
        let RebalanceOutcome::Balanced { leg, added_qty, .. } = outcome else {
            panic!("expected balanced outcome, got {outcome:?}");
        };
        assert_eq!(leg, Leg::B);
        assert_eq!(added_qty, dec!(0.162));
        assert_eq!(short.filled_qty, dec!(10.162));
        assert!((long.notional() - short.notional()).abs() <= dec!(0.50));

        let orders = gateway.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].request.side, Side::Sell);
        assert!(!orders[0].request.reduce_only);
    }

    #[tokio::test]
    async fn test_rejected_top_up_fails() {
        let (engine, gateway) = engine(dec!(4.92));
        gateway.reject_next(1);
        let mut long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let mut short = fill(Leg::B, Side::Sell, dec!(10), dec!(4.92));

        let outcome = engine.rebalance(&mut long, &mut short).await;
        assert!(matches!(outcome, RebalanceOutcome::Failed { .. }));
        assert_eq!(short.filled_qty, dec!(10));
    }

    #[tokio::test]
    async fn test_dust_sends_no_order() {
        let (engine, gateway) = engine(dec!(4.96));
        let mut long = fill(Leg::A, Side::Buy, dec!(5), dec!(10));
        let mut short = fill(Leg::B, Side::Sell, dec!(10), dec!(4.96));
        let outcome = engine.rebalance(&mut long, &mut short).await;
        assert!(matches!(outcome, RebalanceOutcome::Dust { .. }));
        assert!(gateway.orders().is_empty());
    }
}
