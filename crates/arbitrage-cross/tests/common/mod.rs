//! Shared harness for engine integration tests.
//!
//! The session reads quotes from `market` feeds; the paper gateways fill
//! against separate `fills` feeds so scripted market sequences are not
//! consumed by order simulation.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::UnboundedReceiver;

use spread_arb_core::{
    AppConfig, EventSink, Instrument, InstrumentSpec, LifecycleState, OrderGateway, PerLeg,
    PriceFeed, RunMode, TradeEvent, TradingPair,
};
use spread_arb_cross::testkit::ScriptedFeed;
use spread_arb_cross::{EngineContext, FeeSchedule, PaperGateway, PaperGatewayConfig};

pub const SYMBOL: &str = "SOLUSDT";

pub fn pair() -> TradingPair {
    let spec = InstrumentSpec::new(3, dec!(1), dec!(0.001));
    TradingPair::new(
        SYMBOL,
        Instrument::new(SYMBOL, spec),
        Instrument::new(SYMBOL, spec),
    )
}

/// Defaults with every interval shrunk to milliseconds.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.mode = RunMode::Paper;
    config.strategy.entry_poll_ms = 1;
    config.strategy.exit_poll_ms = 1;
    config.strategy.entry_confirm_timeout_ms = 2_000;
    config.execution.order_timeout_ms = 50;
    config.execution.close_timeout_ms = 500;
    config.execution.close_poll_ms = 2;
    config.watcher.poll_ms = 2;
    config.scanner.window_ms = 200;
    config.scanner.monitor_poll_ms = 2;
    config.scanner.confirm_retries = 1;
    config.scanner.confirm_retry_ms = 1;
    config.scanner.discovery_retry_ms = 10;
    config
}

pub struct Harness {
    pub ctx: EngineContext,
    pub market: PerLeg<Arc<ScriptedFeed>>,
    pub fills: PerLeg<Arc<ScriptedFeed>>,
    pub gateways: PerLeg<Arc<PaperGateway>>,
    pub events: UnboundedReceiver<TradeEvent>,
}

impl Harness {
    pub fn new(config: AppConfig) -> Self {
        let market = PerLeg::new(
            Arc::new(ScriptedFeed::new("venue-a")),
            Arc::new(ScriptedFeed::new("venue-b")),
        );
        let fills = PerLeg::new(
            Arc::new(ScriptedFeed::new("venue-a")),
            Arc::new(ScriptedFeed::new("venue-b")),
        );
        let gateways = PerLeg::new(
            Arc::new(PaperGateway::new(
                "venue-a",
                fills.a.clone() as Arc<dyn PriceFeed>,
                PaperGatewayConfig::always_fill(),
            )),
            Arc::new(PaperGateway::new(
                "venue-b",
                fills.b.clone() as Arc<dyn PriceFeed>,
                PaperGatewayConfig::always_fill(),
            )),
        );
        let (sink, events) = EventSink::channel();
        let ctx = EngineContext::new(
            config,
            PerLeg::new(
                market.a.clone() as Arc<dyn PriceFeed>,
                market.b.clone() as Arc<dyn PriceFeed>,
            ),
            PerLeg::new(
                gateways.a.clone() as Arc<dyn OrderGateway>,
                gateways.b.clone() as Arc<dyn OrderGateway>,
            ),
            sink,
        )
        .with_fees(FeeSchedule::free());

        Self {
            ctx,
            market,
            fills,
            gateways,
            events,
        }
    }

    /// Fills at A ask 10.00 and B bid 10.60 unless a price is queued.
    pub fn with_entry_fills(self) -> Self {
        self.fills.a.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
        self.fills.b.set_quote(SYMBOL, dec!(10.60), dec!(10.61));
        self
    }

    /// Market A fixed at 9.99 / 10.00; B bids queued, each with a one-tick ask.
    pub fn script_b_bids(&self, bids: &[Decimal]) {
        self.market.a.set_quote(SYMBOL, dec!(9.99), dec!(10.00));
        self.market
            .b
            .push_quotes(SYMBOL, bids.iter().map(|bid| (*bid, *bid + dec!(0.01))));
    }

    pub fn order_count(&self) -> usize {
        self.gateways.a.orders().len() + self.gateways.b.orders().len()
    }

    pub fn positions(&self) -> (Decimal, Decimal) {
        (
            self.gateways.a.position(SYMBOL),
            self.gateways.b.position(SYMBOL),
        )
    }

    pub fn drain_events(&mut self) -> Vec<TradeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits until the lifecycle reaches `state`.
    pub async fn wait_for_state(&self, state: LifecycleState) {
        let lifecycle = self.ctx.lifecycle.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while lifecycle.state() != state {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("lifecycle never reached the expected state");
    }
}
