//! Shared handles threaded through every trade.

use std::sync::Arc;

use spread_arb_core::{
    AppConfig, EventSink, FeedError, Leg, OrderGateway, PerLeg, PriceFeed, SpreadSample,
    TradingPair,
};

use crate::executor::ExecutionCoordinator;
use crate::fees::FeeSchedule;
use crate::lifecycle::PositionLifecycle;
use crate::matcher::NotionalMatcher;
use crate::spread::SpreadEvaluator;

/// Configuration, venue adapters and the global lifecycle.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<AppConfig>,
    pub feeds: PerLeg<Arc<dyn PriceFeed>>,
    pub gateways: PerLeg<Arc<dyn OrderGateway>>,
    pub lifecycle: Arc<PositionLifecycle>,
    pub fees: FeeSchedule,
    pub events: EventSink,
}

impl EngineContext {
    pub fn new(
        config: AppConfig,
        feeds: PerLeg<Arc<dyn PriceFeed>>,
        gateways: PerLeg<Arc<dyn OrderGateway>>,
        events: EventSink,
    ) -> Self {
        Self {
            fees: FeeSchedule::from_venues(&config.venue_a, &config.venue_b),
            lifecycle: Arc::new(PositionLifecycle::new(events.clone())),
            config: Arc::new(config),
            feeds,
            gateways,
            events,
        }
    }

    #[must_use]
    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Reads both venues' top of book concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first feed error; a sample is only produced when both
    /// venues answered with valid quotes.
    pub async fn fetch_sample(&self, pair: &TradingPair) -> Result<SpreadSample, FeedError> {
        let (a, b) = tokio::join!(
            self.feeds.a.top_of_book(pair.symbol(Leg::A)),
            self.feeds.b.top_of_book(pair.symbol(Leg::B)),
        );
        Ok(SpreadSample::new(a?, b?))
    }

    pub fn evaluator(&self) -> SpreadEvaluator {
        SpreadEvaluator::new(
            self.config.strategy.min_signal_pct,
            self.config.strategy.directions,
        )
    }

    pub fn matcher(&self) -> NotionalMatcher {
        NotionalMatcher::new(
            self.config.execution.match_tolerance_usd,
            self.config.execution.matcher_max_iterations,
        )
    }

    pub fn coordinator(&self) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            self.gateways.clone(),
            &self.config.execution,
            self.events.clone(),
        )
    }
}
