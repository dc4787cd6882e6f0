//! One trade, from entry confirmation to a flat book.
//!
//! A [`TradeSession`] owns the global trade lock for its whole life:
//!
//! ```text
//! acquire lock ─► exposure check ─► ENTRY_CONFIRMING ─► size ─► ENTERING
//!      │                                                          │
//!      │                                              both legs filled?
//!      │                                                  │         │
//!      │                                                 OPEN     flatten ─► IDLE
//!      │                                                  │
//!      │                        exit confirmed ◄──────────┼──────► liquidation
//!      │                              │                                │
//!      │                          CLOSING                        FORCE_CLOSING
//!      │                              │                                │
//!      └──────────────── release ◄── IDLE ◄────────────────────────────┘
//! ```
//!
//! The locked part runs in its own task. If it panics, both venues are
//! flattened from their reported positions before the lock is released.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chrono::Utc;
use spread_arb_core::{
    Direction, Leg, LifecycleState, Position, SpreadSample, TradeEvent, TradeSummary, TradingPair,
};

use crate::context::EngineContext;
use crate::debounce::{ConfirmationDebouncer, DebounceOutcome, EntryCondition, ExitCondition, Observation};
use crate::executor::{EntryOutcome, EntryPlan};
use crate::fees::{summarize_trade, CloseFacts};
use crate::flatten::{FlattenReport, Flattener};
use crate::lifecycle::LifecycleError;
use crate::matcher::MatchError;
use crate::spread::{exit_view, ExitView};
use crate::watcher::{LiquidationWatcher, WatcherExit};

// =============================================================================
// Outcomes
// =============================================================================

/// Why an entry was abandoned before any order was sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbortReason {
    #[error("spread fell to {spread_pct}% during confirmation")]
    SpreadCollapsed { spread_pct: Decimal },

    #[error("entry not confirmed within {timeout:?}")]
    ConfirmTimeout { timeout: Duration },

    #[error("sizing failed: {0}")]
    Sizing(MatchError),

    #[error("leg {leg} already holds {qty}")]
    ExistingExposure { leg: Leg, qty: Decimal },

    #[error("could not verify leg {leg} is flat: {error}")]
    ExposureCheckFailed { leg: Leg, error: String },
}

/// How a trade session ended.
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    /// The lock was held, trading is halted, or the lifecycle refused.
    NotStarted(LifecycleError),
    /// Abandoned before any order.
    Aborted(AbortReason),
    /// Orders were sent but no hedged position resulted.
    EntryFailed {
        reason: String,
        flatten: FlattenReport,
    },
    /// Exited on convergence or profit target.
    Closed(TradeSummary),
    /// Closed by the liquidation watcher. Trading is halted.
    ForceClosed {
        liquidated: Leg,
        summary: TradeSummary,
    },
    /// The session task failed unexpectedly and both venues were flattened.
    Crashed {
        error: String,
        flatten: FlattenReport,
    },
}

impl TradeOutcome {
    pub fn summary(&self) -> Option<&TradeSummary> {
        match self {
            Self::Closed(summary) | Self::ForceClosed { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// True if orders reached a venue.
    pub fn traded(&self) -> bool {
        matches!(
            self,
            Self::EntryFailed { .. } | Self::Closed(_) | Self::ForceClosed { .. } | Self::Crashed { .. }
        )
    }
}

enum ExitTrigger {
    Converged { view: ExitView, sample: SpreadSample },
    Forced,
}

// =============================================================================
// Trade Session
// =============================================================================

/// A single trade attempt on one pair in one direction.
#[derive(Clone)]
pub struct TradeSession {
    ctx: EngineContext,
    pair: TradingPair,
    direction: Direction,
}

impl TradeSession {
    pub fn new(ctx: EngineContext, pair: TradingPair, direction: Direction) -> Self {
        Self {
            ctx,
            pair,
            direction,
        }
    }

    /// Runs the trade to completion.
    ///
    /// Must be awaited to the end: the trade lock is held until this
    /// returns, and the position is flat (or trading halted) by then.
    pub async fn run(self) -> TradeOutcome {
        let guard = match self.ctx.lifecycle.try_acquire(&self.pair.canonical) {
            Ok(guard) => guard,
            Err(e) => {
                info!(symbol = %self.pair.canonical, reason = %e, "Entry skipped");
                return TradeOutcome::NotStarted(e);
            }
        };

        let session = self.clone();
        let outcome = match tokio::spawn(session.run_locked()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(symbol = %self.pair.canonical, error = %e, "Trade task failed, flattening both venues");
                let flatten = self.flattener().flatten_pair(&self.pair).await;
                if !flatten.is_flat() {
                    self.ctx
                        .lifecycle
                        .halt(format!("unconfirmed exposure on {} after task failure", self.pair.canonical));
                }
                TradeOutcome::Crashed {
                    error: e.to_string(),
                    flatten,
                }
            }
        };

        drop(guard);
        outcome
    }

    fn flattener(&self) -> Flattener {
        self.ctx.coordinator().flattener().clone()
    }

    fn set_state(&self, to: LifecycleState) {
        if let Err(e) = self.ctx.lifecycle.transition(to) {
            debug!(error = %e, "Lifecycle transition skipped");
        }
    }

    fn abort(&self, reason: AbortReason) -> TradeOutcome {
        warn!(symbol = %self.pair.canonical, reason = %reason, "ENTRY ABORTED");
        self.ctx.events.emit(TradeEvent::EntryAborted {
            symbol: self.pair.canonical.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        if self.ctx.lifecycle.state() != LifecycleState::Idle {
            self.set_state(LifecycleState::Idle);
        }
        TradeOutcome::Aborted(reason)
    }

    async fn run_locked(self) -> TradeOutcome {
        if let Err(reason) = self.check_flat().await {
            return self.abort(reason);
        }
        if let Err(e) = self.ctx.lifecycle.transition(LifecycleState::EntryConfirming) {
            return TradeOutcome::NotStarted(e);
        }
        info!(
            symbol = %self.pair.canonical,
            direction = %self.direction,
            "Confirming entry"
        );

        let (sample, trigger_spread) = match self.confirm_entry().await {
            Ok(confirmed) => confirmed,
            Err(reason) => return self.abort(reason),
        };

        let long_leg = self.direction.long_leg();
        let short_leg = self.direction.short_leg();
        let long_price = sample.quote(long_leg).ask;
        let short_price = sample.quote(short_leg).bid;
        let quantities = match self.ctx.matcher().match_notional(
            self.ctx.config.strategy.notional_usd,
            long_price,
            short_price,
            &self.pair.instrument(long_leg).spec,
            &self.pair.instrument(short_leg).spec,
        ) {
            Ok(quantities) => quantities,
            Err(e) => return self.abort(AbortReason::Sizing(e)),
        };

        if let Err(e) = self.ctx.lifecycle.transition(LifecycleState::Entering) {
            return TradeOutcome::NotStarted(e);
        }

        let plan = EntryPlan::from_trigger(
            self.pair.clone(),
            self.direction,
            &sample,
            trigger_spread,
            quantities,
        );

        let position = match self.ctx.coordinator().execute(&plan).await {
            EntryOutcome::Opened { position, .. } => position,
            EntryOutcome::Failed { reason, flatten } => {
                if !flatten.is_flat() {
                    self.ctx
                        .lifecycle
                        .halt(format!("unconfirmed exposure on {} after failed entry", self.pair.canonical));
                }
                self.set_state(LifecycleState::Idle);
                return TradeOutcome::EntryFailed { reason, flatten };
            }
        };

        if let Err(e) = self.ctx.lifecycle.open_position(position.clone()) {
            error!(error = %e, "Could not record open position, flattening");
            let flatten = self.flattener().flatten_pair(&self.pair).await;
            self.set_state(LifecycleState::Idle);
            return TradeOutcome::EntryFailed {
                reason: e.to_string(),
                flatten,
            };
        }

        self.hold(position).await
    }

    /// Refuses to enter when either venue already holds the symbol.
    async fn check_flat(&self) -> Result<(), AbortReason> {
        let (a, b) = tokio::join!(
            self.ctx.gateways.a.position_qty(self.pair.symbol(Leg::A)),
            self.ctx.gateways.b.position_qty(self.pair.symbol(Leg::B)),
        );
        for (leg, reading) in [(Leg::A, a), (Leg::B, b)] {
            match reading {
                Ok(qty) if qty.is_zero() => {}
                Ok(qty) => return Err(AbortReason::ExistingExposure { leg, qty }),
                Err(e) => {
                    return Err(AbortReason::ExposureCheckFailed {
                        leg,
                        error: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn confirm_entry(&self) -> Result<(SpreadSample, Decimal), AbortReason> {
        let strategy = &self.ctx.config.strategy;
        let evaluator = self.ctx.evaluator();
        let condition = EntryCondition {
            entry_spread_pct: strategy.entry_spread_pct,
            abort_spread_pct: strategy.abort_spread_pct,
        };
        let mut debouncer = ConfirmationDebouncer::new(strategy.entry_confirmations);
        let deadline = Instant::now() + strategy.entry_confirm_timeout();

        loop {
            let observed = match self.ctx.fetch_sample(&self.pair).await {
                Ok(sample) => evaluator
                    .spread_for(&sample, self.direction)
                    .map(|spread| (sample, spread)),
                Err(e) => {
                    debug!(symbol = %self.pair.canonical, error = %e, "Entry sample unavailable");
                    None
                }
            };
            let spread = observed.as_ref().map(|(_, s)| *s);

            match (debouncer.observe(condition.classify(spread)), observed) {
                (DebounceOutcome::Fired, Some((sample, spread))) => {
                    info!(
                        symbol = %self.pair.canonical,
                        spread = %spread.round_dp(4),
                        "ENTRY CONFIRMED {}/{}",
                        debouncer.threshold(),
                        debouncer.threshold()
                    );
                    return Ok((sample, spread));
                }
                (DebounceOutcome::Aborted { .. }, Some((_, spread))) => {
                    return Err(AbortReason::SpreadCollapsed { spread_pct: spread });
                }
                (DebounceOutcome::Progress { count }, Some((_, spread))) => {
                    info!(
                        symbol = %self.pair.canonical,
                        spread = %spread.round_dp(4),
                        "ENTRY CONFIRM {}/{}",
                        count,
                        debouncer.threshold()
                    );
                    self.ctx.events.emit(TradeEvent::EntryConfirmProgress {
                        symbol: self.pair.canonical.clone(),
                        direction: self.direction,
                        count,
                        threshold: debouncer.threshold(),
                        spread_pct: spread,
                        timestamp: Utc::now(),
                    });
                }
                (DebounceOutcome::Reset { previous }, _) if previous > 0 => {
                    info!(
                        symbol = %self.pair.canonical,
                        spread = ?spread.map(|s| s.round_dp(4)),
                        previous,
                        "Entry confirmation reset"
                    );
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(AbortReason::ConfirmTimeout {
                    timeout: strategy.entry_confirm_timeout(),
                });
            }
            tokio::time::sleep(strategy.entry_poll()).await;
        }
    }

    async fn hold(&self, position: Position) -> TradeOutcome {
        let flattener = self.flattener();
        let watcher = LiquidationWatcher::spawn(
            position.clone(),
            self.pair.clone(),
            self.ctx.gateways.clone(),
            flattener.clone(),
            self.ctx.lifecycle.clone(),
            self.ctx.config.watcher.clone(),
            self.ctx.events.clone(),
        );

        match self.monitor_exit(&position).await {
            ExitTrigger::Converged { view, sample } => {
                let watcher_exit = watcher.stop().await;
                debug!(exit = ?watcher_exit, "Liquidation watcher stopped");

                let flatten = flattener.flatten_pair(&self.pair).await;
                let summary = self
                    .summarize(&position, &flatten, Some((view, sample)), false)
                    .await;
                if !flatten.is_flat() {
                    self.ctx
                        .lifecycle
                        .halt(format!("unconfirmed exposure on {} after close", self.pair.canonical));
                }
                self.set_state(LifecycleState::Idle);
                info!(
                    symbol = %summary.symbol,
                    captured = ?summary.captured_spread_pct.map(|c| c.round_dp(4)),
                    gross = %summary.gross_pnl.round_dp(4),
                    fees = %summary.fees.round_dp(4),
                    net = %summary.net_pnl.round_dp(4),
                    "TRADE CLOSED"
                );
                self.ctx.events.emit(TradeEvent::TradeClosed(summary.clone()));
                TradeOutcome::Closed(summary)
            }
            ExitTrigger::Forced => {
                let exit = watcher.join().await;
                let (liquidated, flatten) = match exit {
                    WatcherExit::Liquidated { leg, flatten, .. } => (leg, flatten),
                    other => {
                        // The watcher ended without handling the close; do it here.
                        error!(exit = ?other, "Forced close without watcher report, flattening");
                        let flatten = flattener.flatten_pair(&self.pair).await;
                        self.ctx
                            .lifecycle
                            .halt(format!("forced close of {} without liquidation report", self.pair.canonical));
                        (position.long.leg, flatten)
                    }
                };
                let summary = self.summarize(&position, &flatten, None, true).await;
                self.set_state(LifecycleState::Idle);
                error!(
                    symbol = %summary.symbol,
                    liquidated = %liquidated,
                    net = %summary.net_pnl.round_dp(4),
                    "TRADE FORCE-CLOSED"
                );
                self.ctx.events.emit(TradeEvent::TradeClosed(summary.clone()));
                TradeOutcome::ForceClosed {
                    liquidated,
                    summary,
                }
            }
        }
    }

    async fn monitor_exit(&self, position: &Position) -> ExitTrigger {
        let strategy = &self.ctx.config.strategy;
        let condition = ExitCondition {
            profit_target_pct: strategy.profit_target_pct,
            epsilon_pct: strategy.exit_epsilon_pct,
        };
        let mut debouncer = ConfirmationDebouncer::new(strategy.exit_confirmations);

        loop {
            if !matches!(
                self.ctx.lifecycle.state(),
                LifecycleState::Open | LifecycleState::ExitConfirming
            ) {
                return ExitTrigger::Forced;
            }

            let observed = match self.ctx.fetch_sample(&self.pair).await {
                Ok(sample) => exit_view(position, &sample).map(|view| (view, sample)),
                Err(e) => {
                    debug!(symbol = %self.pair.canonical, error = %e, "Exit sample unavailable");
                    None
                }
            };
            let observation = observed.as_ref().map_or(Observation::Unavailable, |(v, _)| {
                condition.classify(v.captured_pct, v.exit_spread_pct)
            });

            match (debouncer.observe(observation), observed) {
                (DebounceOutcome::Fired, Some((view, sample))) => {
                    info!(
                        symbol = %self.pair.canonical,
                        captured = %view.captured_pct.round_dp(4),
                        exit_spread = %view.exit_spread_pct.round_dp(4),
                        "EXIT CONFIRMED {}/{}",
                        debouncer.threshold(),
                        debouncer.threshold()
                    );
                    return if self.ctx.lifecycle.begin_close() {
                        ExitTrigger::Converged { view, sample }
                    } else {
                        ExitTrigger::Forced
                    };
                }
                (DebounceOutcome::Progress { count }, Some((view, _))) => {
                    if self.ctx.lifecycle.state() == LifecycleState::Open {
                        self.set_state(LifecycleState::ExitConfirming);
                    }
                    info!(
                        symbol = %self.pair.canonical,
                        captured = %view.captured_pct.round_dp(4),
                        exit_spread = %view.exit_spread_pct.round_dp(4),
                        "EXIT CONFIRM {}/{}",
                        count,
                        debouncer.threshold()
                    );
                    self.ctx.events.emit(TradeEvent::ExitConfirmProgress {
                        symbol: self.pair.canonical.clone(),
                        count,
                        threshold: debouncer.threshold(),
                        captured_pct: view.captured_pct,
                        exit_spread_pct: view.exit_spread_pct,
                        timestamp: Utc::now(),
                    });
                }
                (DebounceOutcome::Reset { previous }, _) => {
                    if self.ctx.lifecycle.state() == LifecycleState::ExitConfirming {
                        self.set_state(LifecycleState::Open);
                    }
                    if previous > 0 {
                        debug!(symbol = %self.pair.canonical, previous, "Exit confirmation reset");
                    }
                }
                _ => {}
            }

            tokio::time::sleep(strategy.exit_poll()).await;
        }
    }

    async fn summarize(
        &self,
        position: &Position,
        flatten: &FlattenReport,
        exit: Option<(ExitView, SpreadSample)>,
        forced: bool,
    ) -> TradeSummary {
        let (funding_a, funding_b) = tokio::join!(
            self.ctx
                .gateways
                .a
                .funding_since(self.pair.symbol(Leg::A), position.opened_at),
            self.ctx
                .gateways
                .b
                .funding_since(self.pair.symbol(Leg::B), position.opened_at),
        );
        let funding = [funding_a, funding_b]
            .into_iter()
            .map(|f| {
                f.unwrap_or_else(|e| {
                    warn!(error = %e, "Funding lookup failed, counting as zero");
                    Decimal::ZERO
                })
            })
            .sum();

        let facts = CloseFacts {
            exit_prices: flatten.legs.clone().map(|_, report| report.exit_price),
            exit_view: exit.as_ref().map(|(view, _)| *view),
            exit_sample: exit.map(|(_, sample)| sample),
            funding,
            closed_at: Utc::now(),
            forced,
        };
        summarize_trade(position, &facts, &self.ctx.fees)
    }
}
