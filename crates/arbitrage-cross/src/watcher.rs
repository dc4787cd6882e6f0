//! Liquidation watcher for the open position.
//!
//! While a position is open a background task polls both venues' reported
//! position sizes. A leg that was seen non-zero and then reads zero for
//! `zero_confirmations` consecutive polls is treated as liquidated:
//!
//! 1. the watcher claims the close (`ForceClosing`), unless a normal exit
//!    already did,
//! 2. the surviving leg is closed with a reduce-only order,
//! 3. both venues are flattened and reconciled,
//! 4. trading is halted for the rest of the process.
//!
//! Fetch errors are skipped; they neither count toward nor reset the zero
//! streak.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use spread_arb_core::{
    EventSink, Leg, OrderGateway, PerLeg, Position, TradeEvent, TradingPair, WatcherConfig,
};

use crate::flatten::{FlattenLegReport, FlattenReport, Flattener};
use crate::lifecycle::PositionLifecycle;

// =============================================================================
// Detection
// =============================================================================

/// Zero-streak tracking for one leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegZeroTracker {
    seen_non_zero: bool,
    consecutive_zero: u32,
}

impl LegZeroTracker {
    /// Records a reading and returns the current zero streak. Zeros before
    /// the leg was ever seen non-zero do not count.
    pub fn observe(&mut self, qty: Decimal) -> u32 {
        if qty.is_zero() {
            if self.seen_non_zero {
                self.consecutive_zero += 1;
            }
        } else {
            self.seen_non_zero = true;
            self.consecutive_zero = 0;
        }
        self.consecutive_zero
    }

    pub const fn consecutive_zero(&self) -> u32 {
        self.consecutive_zero
    }
}

/// Liquidation detection across both legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationDetector {
    trackers: PerLeg<LegZeroTracker>,
    threshold: u32,
}

impl LiquidationDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            trackers: PerLeg::default(),
            threshold: threshold.max(1),
        }
    }

    /// Feeds one poll's readings. `None` means the read failed and is
    /// skipped. Returns the liquidated leg, if any.
    pub fn observe(&mut self, readings: PerLeg<Option<Decimal>>) -> Option<Leg> {
        let mut liquidated = None;
        for leg in Leg::BOTH {
            if let Some(qty) = *readings.get(leg) {
                let streak = self.trackers.get_mut(leg).observe(qty);
                if streak >= self.threshold && liquidated.is_none() {
                    liquidated = Some(leg);
                }
            }
        }
        liquidated
    }
}

// =============================================================================
// Watcher Task
// =============================================================================

/// How a watcher task ended.
#[derive(Debug, Clone)]
pub enum WatcherExit {
    /// Stopped by its owner.
    Stopped,
    /// The watched position is no longer the current one.
    PositionGone,
    /// A close was already in progress when liquidation was detected.
    CloseInProgress,
    /// Liquidation handled and trading halted.
    Liquidated {
        leg: Leg,
        survivor: FlattenLegReport,
        flatten: FlattenReport,
    },
}

/// Handle to a running watcher task.
pub struct LiquidationWatcher {
    should_stop: Arc<AtomicBool>,
    handle: JoinHandle<WatcherExit>,
}

impl LiquidationWatcher {
    /// Starts watching `position`.
    pub fn spawn(
        position: Position,
        pair: TradingPair,
        gateways: PerLeg<Arc<dyn OrderGateway>>,
        flattener: Flattener,
        lifecycle: Arc<PositionLifecycle>,
        config: WatcherConfig,
        events: EventSink,
    ) -> Self {
        let should_stop = Arc::new(AtomicBool::new(false));
        let task = WatchTask {
            position,
            pair,
            gateways,
            flattener,
            lifecycle,
            poll: config.poll(),
            detector: LiquidationDetector::new(config.zero_confirmations),
            should_stop: should_stop.clone(),
            events,
        };
        Self {
            should_stop,
            handle: tokio::spawn(task.run()),
        }
    }

    /// Returns a handle that can be used to stop the watcher.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the task to stop and waits for it.
    pub async fn stop(self) -> WatcherExit {
        self.should_stop.store(true, Ordering::SeqCst);
        self.join().await
    }

    /// Waits for the task without signalling it.
    pub async fn join(self) -> WatcherExit {
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Liquidation watcher task failed");
                WatcherExit::Stopped
            }
        }
    }
}

struct WatchTask {
    position: Position,
    pair: TradingPair,
    gateways: PerLeg<Arc<dyn OrderGateway>>,
    flattener: Flattener,
    lifecycle: Arc<PositionLifecycle>,
    poll: Duration,
    detector: LiquidationDetector,
    should_stop: Arc<AtomicBool>,
    events: EventSink,
}

impl WatchTask {
    async fn run(mut self) -> WatcherExit {
        debug!(symbol = %self.position.symbol, "Liquidation watcher started");
        loop {
            if self.should_stop.load(Ordering::SeqCst) {
                return WatcherExit::Stopped;
            }
            match self.lifecycle.snapshot() {
                Some(current) if current.id == self.position.id => {}
                _ => return WatcherExit::PositionGone,
            }

            let readings = self.read_positions().await;
            if let Some(leg) = self.detector.observe(readings) {
                if self.should_stop.load(Ordering::SeqCst) {
                    return WatcherExit::Stopped;
                }
                return self.handle_liquidation(leg).await;
            }

            tokio::time::sleep(self.poll).await;
        }
    }

    async fn read_positions(&self) -> PerLeg<Option<Decimal>> {
        let symbol_a = self.pair.symbol(Leg::A);
        let symbol_b = self.pair.symbol(Leg::B);
        let (a, b) = tokio::join!(
            self.gateways.a.position_qty(symbol_a),
            self.gateways.b.position_qty(symbol_b),
        );
        let skip_errors = |leg: Leg, reading: Result<Decimal, _>| match reading {
            Ok(qty) => Some(qty),
            Err(e) => {
                debug!(leg = %leg, error = %e, "Position read failed, skipping");
                None
            }
        };
        PerLeg::new(skip_errors(Leg::A, a), skip_errors(Leg::B, b))
    }

    async fn handle_liquidation(&self, leg: Leg) -> WatcherExit {
        if !self.lifecycle.begin_force_close(self.position.id) {
            warn!(leg = %leg, "Leg reads zero but a close is already in progress");
            return WatcherExit::CloseInProgress;
        }

        let venue = self.gateways.get(leg).venue().to_string();
        error!(
            symbol = %self.position.symbol,
            leg = %leg,
            venue = %venue,
            "LIQUIDATION DETECTED, closing surviving leg"
        );
        self.events.emit(TradeEvent::LiquidationDetected {
            symbol: self.position.symbol.clone(),
            leg,
            venue: venue.clone(),
            timestamp: Utc::now(),
        });

        let survivor_leg = leg.other();
        let survivor = self
            .flattener
            .flatten_leg(survivor_leg, self.pair.instrument(survivor_leg))
            .await;
        let flatten = self.flattener.flatten_pair(&self.pair).await;

        self.lifecycle
            .halt(format!("liquidation on leg {leg} ({venue}) for {}", self.position.symbol));

        WatcherExit::Liquidated {
            leg,
            survivor,
            flatten,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== Detector Tests ====================

    #[test]
    fn test_two_zeros_after_non_zero_trigger() {
        let mut detector = LiquidationDetector::new(2);
        assert_eq!(detector.observe(PerLeg::new(Some(dec!(12)), Some(dec!(-12)))), None);
        assert_eq!(detector.observe(PerLeg::new(Some(dec!(0)), Some(dec!(-12)))), None);
        assert_eq!(
            detector.observe(PerLeg::new(Some(dec!(0)), Some(dec!(-12)))),
            Some(Leg::A)
        );
    }

    #[test]
    fn test_zero_before_any_non_zero_is_ignored() {
        let mut tracker = LegZeroTracker::default();
        assert_eq!(tracker.observe(dec!(0)), 0);
        assert_eq!(tracker.observe(dec!(0)), 0);
        assert_eq!(tracker.observe(dec!(3)), 0);
        assert_eq!(tracker.observe(dec!(0)), 1);
    }

    #[test]
    fn test_non_zero_resets_streak() {
        let mut detector = LiquidationDetector::new(2);
        detector.observe(PerLeg::new(Some(dec!(1)), Some(dec!(-1))));
        detector.observe(PerLeg::new(Some(dec!(0)), Some(dec!(-1))));
        assert_eq!(detector.observe(PerLeg::new(Some(dec!(1)), Some(dec!(-1)))), None);
        assert_eq!(detector.observe(PerLeg::new(Some(dec!(0)), Some(dec!(-1)))), None);
    }

    #[test]
    fn test_fetch_errors_are_skipped() {
        let mut detector = LiquidationDetector::new(2);
        detector.observe(PerLeg::new(Some(dec!(5)), Some(dec!(-5))));
        detector.observe(PerLeg::new(Some(dec!(5)), Some(dec!(0))));
        // A failed read neither counts nor resets.
        assert_eq!(detector.observe(PerLeg::new(Some(dec!(5)), None)), None);
        assert_eq!(
            detector.observe(PerLeg::new(Some(dec!(5)), Some(dec!(0)))),
            Some(Leg::B)
        );
    }
}
