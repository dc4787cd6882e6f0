//! Cross-venue spread arbitrage on two perpetual futures venues.
//!
//! When the same contract trades at different prices on two venues, buying
//! the cheap side and shorting the rich side captures the spread as the
//! prices converge:
//!
//! ```text
//! Venue A:  SOLUSDT  bid 9.95   ask 10.00
//! Venue B:  SOLUSDT  bid 10.60  ask 10.65
//!
//! long A / short B entry spread = (10.60 - 10.00) / 10.00 × 100 = 6.0%
//!
//!   Buy  A @ 10.00   (ask)
//!   Sell B @ 10.60   (bid)
//!   Exit when the captured spread reaches the profit target or the
//!   venues converge.
//! ```
//!
//! # Modules
//!
//! - [`spread`]: entry/exit spread math and the [`SpreadEvaluator`]
//! - [`debounce`]: N-consecutive confirmation with abort
//! - [`matcher`]: equal-notional quantities under venue lot rules
//! - [`executor`]: concurrent two-leg entry with flatten on failure
//! - [`rebalance`]: post-fill notional top-ups
//! - [`flatten`]: reduce-only close of whatever each venue reports
//! - [`lifecycle`]: position state machine and the global trade lock
//! - [`watcher`]: liquidation detection while a position is open
//! - [`session`]: one trade from confirmation to a flat book
//! - [`scanner`]: windowed scanning that dispatches trade sessions
//! - [`paper`]: simulated order gateway for dry runs
//!
//! # Example
//!
//! ```ignore
//! use spread_arb_cross::{EngineContext, SpreadScanner};
//!
//! let ctx = EngineContext::new(config, feeds, gateways, EventSink::disabled());
//! let scanner = SpreadScanner::new(ctx, Arc::new(symbols));
//! match scanner.run().await {
//!     Ok(stats) => println!("{} trades closed", stats.trades_closed),
//!     Err(e) => eprintln!("stopped: {e}"),
//! }
//! ```
//!
//! # Safety
//!
//! At most one position exists at a time. The trade lock is taken before
//! entry confirmation and released only after both venues report flat. A
//! liquidation on either leg halts trading for the rest of the process.

pub mod context;
pub mod debounce;
pub mod error;
pub mod executor;
pub mod fees;
pub mod flatten;
pub mod lifecycle;
pub mod matcher;
pub mod paper;
pub mod rebalance;
pub mod scanner;
pub mod session;
pub mod spread;
pub mod watcher;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-export main types for convenience
pub use context::EngineContext;
pub use debounce::{
    ConfirmationDebouncer, DebounceOutcome, EntryCondition, ExitCondition, Observation,
};
pub use error::EngineError;
pub use executor::{EntryOutcome, EntryPlan, ExecutionCoordinator, LegFill};
pub use fees::{summarize_trade, CloseFacts, FeeSchedule};
pub use flatten::{FlattenConfig, FlattenLegReport, FlattenReport, FlattenStatus, Flattener};
pub use lifecycle::{LifecycleError, PositionLifecycle, TradeGuard};
pub use matcher::{MatchError, MatchedQuantities, NotionalMatcher, PairSide};
pub use paper::{PaperGateway, PaperGatewayConfig};
pub use rebalance::{RebalanceConfig, RebalanceEngine, RebalanceOutcome, RebalancePlan};
pub use scanner::{ScannerStats, SpreadScanner};
pub use session::{AbortReason, TradeOutcome, TradeSession};
pub use spread::{exit_view, ExitView, SpreadEvaluator};
pub use watcher::{LiquidationDetector, LiquidationWatcher, WatcherExit};

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spread_arb_core::{DirectionFilter, ExecutionConfig};

    #[test]
    fn test_public_api_exports() {
        let _ = NotionalMatcher::default();
        let _ = FeeSchedule::default();
        let _ = PositionLifecycle::default();
        let _ = RebalanceConfig::from(&ExecutionConfig::default());
        let _ = SpreadEvaluator::new(dec!(0.25), DirectionFilter::Both);
    }

    #[test]
    fn test_debouncer_accessible() {
        let mut debouncer = ConfirmationDebouncer::new(1);
        assert_eq!(debouncer.observe(Observation::Pass), DebounceOutcome::Fired);
    }
}
