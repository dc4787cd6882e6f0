//! Windowed spread scanner.
//!
//! Each window starts with a snapshot of every common pair, fetched
//! concurrently. Pairs whose best directional spread clears the signal
//! threshold are shortlisted and polled until the window ends. A shortlisted
//! pair that crosses the alert threshold is re-checked a few times; if the
//! alert holds it is handed to a [`TradeSession`] on a background task.
//!
//! ```text
//! ┌──────────────┐   all pairs    ┌──────────────┐  ≥ signal   ┌──────────────┐
//! │ SymbolSource │ ─────────────► │   snapshot   │ ──────────► │  shortlist   │
//! └──────────────┘                └──────────────┘             └──────┬───────┘
//!                                                                     │ ≥ alert
//!                                                                     ▼
//!                                  ┌──────────────┐  held    ┌──────────────┐
//!                                  │ TradeSession │ ◄─────── │  re-checks   │
//!                                  └──────────────┘          └──────────────┘
//! ```
//!
//! The scanner stops when its stop flag is set or when the lifecycle is
//! halted. Running sessions are always awaited before `run` returns.
//!
//! # Example
//!
//! ```ignore
//! let scanner = SpreadScanner::new(ctx, Arc::new(symbols));
//! let stop = scanner.stop_handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.store(true, Ordering::SeqCst);
//! });
//! let stats = scanner.run().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use spread_arb_core::{
    DirectionalSpread, FeedError, RunMode, SpreadSample, SymbolSource, TradingPair,
};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::session::{TradeOutcome, TradeSession};

// =============================================================================
// Statistics
// =============================================================================

/// Scanner counters exposed for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerStats {
    pub windows: u64,
    pub pairs: usize,
    pub shortlisted: u64,
    pub alerts: u64,
    pub cooldown_skips: u64,
    pub false_positives: u64,
    pub lock_skips: u64,
    pub sessions_started: u64,
    pub entries_aborted: u64,
    pub entries_failed: u64,
    pub trades_closed: u64,
    pub trades_forced: u64,
    pub feed_errors: u64,
    pub net_pnl: Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub last_window_at: Option<DateTime<Utc>>,
}

impl ScannerStats {
    pub fn record_outcome(&mut self, outcome: &TradeOutcome) {
        match outcome {
            TradeOutcome::NotStarted(_) => self.lock_skips += 1,
            TradeOutcome::Aborted(_) => self.entries_aborted += 1,
            TradeOutcome::EntryFailed { .. } | TradeOutcome::Crashed { .. } => {
                self.entries_failed += 1;
            }
            TradeOutcome::Closed(summary) => {
                self.trades_closed += 1;
                self.net_pnl += summary.net_pnl;
            }
            TradeOutcome::ForceClosed { summary, .. } => {
                self.trades_forced += 1;
                self.net_pnl += summary.net_pnl;
            }
        }
    }
}

// =============================================================================
// Window Bookkeeping
// =============================================================================

/// Per-symbol alert cooldown.
#[derive(Debug, Clone)]
pub struct AlertCooldown {
    period: Duration,
    last_alert: HashMap<String, Instant>,
}

impl AlertCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_alert: HashMap::new(),
        }
    }

    /// Records an alert for `symbol` at `now` unless one fired within the
    /// cooldown period. Returns whether the alert may proceed.
    pub fn try_fire(&mut self, symbol: &str, now: Instant) -> bool {
        if let Some(last) = self.last_alert.get(symbol) {
            if now.saturating_duration_since(*last) < self.period {
                return false;
            }
        }
        self.last_alert.insert(symbol.to_string(), now);
        true
    }
}

/// Largest and smallest spreads seen during one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowExtremes {
    pub max: Option<(String, Decimal)>,
    pub min: Option<(String, Decimal)>,
}

impl WindowExtremes {
    pub fn record(&mut self, symbol: &str, spread_pct: Decimal) {
        if self.max.as_ref().map_or(true, |(_, max)| spread_pct > *max) {
            self.max = Some((symbol.to_string(), spread_pct));
        }
        if self.min.as_ref().map_or(true, |(_, min)| spread_pct < *min) {
            self.min = Some((symbol.to_string(), spread_pct));
        }
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Windowed scanner that dispatches confirmed alerts to trade sessions.
pub struct SpreadScanner {
    ctx: EngineContext,
    symbols: Arc<dyn SymbolSource>,
    pairs: Vec<TradingPair>,
    cooldown: AlertCooldown,
    sessions: JoinSet<TradeOutcome>,
    should_stop: Arc<AtomicBool>,
    stats: Arc<RwLock<ScannerStats>>,
}

impl SpreadScanner {
    pub fn new(ctx: EngineContext, symbols: Arc<dyn SymbolSource>) -> Self {
        let cooldown = AlertCooldown::new(ctx.config.scanner.alert_cooldown());
        Self {
            ctx,
            symbols,
            pairs: Vec::new(),
            cooldown,
            sessions: JoinSet::new(),
            should_stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(ScannerStats::default())),
        }
    }

    /// Returns a handle to stop the scanner.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    /// Returns access to statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<RwLock<ScannerStats>> {
        Arc::clone(&self.stats)
    }

    fn stopping(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst) || self.ctx.lifecycle.is_halted()
    }

    /// Scans until stopped or halted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Halted`] when trading was halted, after every
    /// running session has finished.
    pub async fn run(mut self) -> Result<ScannerStats, EngineError> {
        let strategy = &self.ctx.config.strategy;
        let scanner = &self.ctx.config.scanner;
        info!(
            mode = ?self.ctx.config.mode,
            signal = %strategy.min_signal_pct,
            alert = %scanner.alert_threshold_pct,
            entry = %strategy.entry_spread_pct,
            profit_target = %strategy.profit_target_pct,
            notional = %strategy.notional_usd,
            "Starting spread scanner"
        );
        self.stats.write().started_at = Some(Utc::now());

        while !self.stopping() {
            if self.pairs.is_empty() {
                if let Err(e) = self.discover().await {
                    warn!(error = %e, "Symbol discovery failed, retrying");
                    tokio::time::sleep(self.ctx.config.scanner.discovery_retry()).await;
                    continue;
                }
                if self.pairs.is_empty() {
                    warn!("No common symbols between venues, retrying");
                    tokio::time::sleep(self.ctx.config.scanner.discovery_retry()).await;
                    continue;
                }
            }

            self.run_window().await;

            let windows = {
                let mut stats = self.stats.write();
                stats.windows += 1;
                stats.last_window_at = Some(Utc::now());
                stats.windows
            };
            let heartbeat = self.ctx.config.scanner.heartbeat_windows;
            if heartbeat > 0 && windows % heartbeat == 0 {
                let stats = self.stats.read().clone();
                info!(
                    windows,
                    pairs = stats.pairs,
                    alerts = stats.alerts,
                    closed = stats.trades_closed,
                    net_pnl = %stats.net_pnl.round_dp(4),
                    "Heartbeat"
                );
            }
        }

        self.drain_sessions().await;
        let stats = self.stats.read().clone();
        info!(windows = stats.windows, closed = stats.trades_closed, "Spread scanner stopped");

        match self.ctx.lifecycle.halt_reason() {
            Some(reason) => Err(EngineError::halted(reason)),
            None => Ok(stats),
        }
    }

    async fn discover(&mut self) -> Result<(), FeedError> {
        let pairs = self.symbols.trading_pairs().await?;
        info!(pairs = pairs.len(), "Common symbols discovered");
        self.stats.write().pairs = pairs.len();
        self.pairs = pairs;
        Ok(())
    }

    async fn run_window(&mut self) {
        let scanner = self.ctx.config.scanner.clone();
        let evaluator = self.ctx.evaluator();
        let deadline = Instant::now() + scanner.window();

        let snapshot = self.sample_pairs(self.pairs.clone()).await;
        let mut shortlist: Vec<TradingPair> = snapshot
            .into_iter()
            .filter_map(|(pair, sample)| {
                let signal = evaluator.evaluate(&sample?)?;
                debug!(symbol = %pair.canonical, spread = %signal.value_pct.round_dp(4), "Shortlisted");
                Some(pair)
            })
            .collect();

        self.stats.write().shortlisted += shortlist.len() as u64;
        info!(
            pairs = self.pairs.len(),
            shortlisted = shortlist.len(),
            "Window started"
        );
        if shortlist.is_empty() {
            tokio::time::sleep(scanner.monitor_poll()).await;
            self.reap_sessions();
            return;
        }

        let mut extremes = WindowExtremes::default();
        while Instant::now() < deadline && !shortlist.is_empty() && !self.stopping() {
            self.reap_sessions();

            let round = self.sample_pairs(shortlist.clone()).await;
            let mut alerted = Vec::new();
            for (pair, sample) in round {
                let Some(signal) = sample.as_ref().and_then(|s| evaluator.best(s)) else {
                    continue;
                };
                extremes.record(&pair.canonical, signal.value_pct);
                if signal.value_pct >= scanner.alert_threshold_pct {
                    alerted.push((pair, signal));
                }
            }

            for (pair, signal) in alerted {
                if self.handle_alert(&pair, signal).await {
                    shortlist.retain(|p| p.canonical != pair.canonical);
                }
            }

            tokio::time::sleep(scanner.monitor_poll()).await;
        }

        match (&extremes.max, &extremes.min) {
            (Some((max_symbol, max)), Some((min_symbol, min))) => info!(
                max_symbol = %max_symbol,
                max = %max.round_dp(4),
                min_symbol = %min_symbol,
                min = %min.round_dp(4),
                "Window complete"
            ),
            _ => info!("Window complete, no valid samples"),
        }
    }

    /// Fetches a sample for every pair, `max_concurrent_fetches` at a time.
    async fn sample_pairs(&self, pairs: Vec<TradingPair>) -> Vec<(TradingPair, Option<SpreadSample>)> {
        let ctx = &self.ctx;
        let results: Vec<_> = stream::iter(pairs)
            .map(|pair| async move {
                let sample = ctx.fetch_sample(&pair).await;
                (pair, sample)
            })
            .buffer_unordered(ctx.config.scanner.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut errors = 0u64;
        let samples = results
            .into_iter()
            .map(|(pair, sample)| match sample {
                Ok(sample) => (pair, Some(sample)),
                Err(e) => {
                    debug!(symbol = %pair.canonical, error = %e, "Sample unavailable");
                    errors += 1;
                    (pair, None)
                }
            })
            .collect();
        if errors > 0 {
            self.stats.write().feed_errors += errors;
        }
        samples
    }

    /// Returns true when the pair should leave this window's shortlist.
    async fn handle_alert(&mut self, pair: &TradingPair, signal: DirectionalSpread) -> bool {
        if !self.cooldown.try_fire(&pair.canonical, Instant::now()) {
            debug!(symbol = %pair.canonical, "Alert in cooldown");
            self.stats.write().cooldown_skips += 1;
            return false;
        }
        self.stats.write().alerts += 1;
        warn!(
            symbol = %pair.canonical,
            direction = %signal.direction,
            spread = %signal.value_pct.round_dp(4),
            "SPREAD ALERT"
        );

        if !self.recheck(pair, signal).await {
            info!(symbol = %pair.canonical, "False positive avoided");
            self.stats.write().false_positives += 1;
            return true;
        }

        if self.ctx.config.mode == RunMode::Monitor {
            info!(symbol = %pair.canonical, "Monitor mode, not trading");
            return true;
        }
        if self.ctx.lifecycle.is_locked() || self.ctx.lifecycle.is_halted() {
            info!(symbol = %pair.canonical, "Trade lock held, signal dropped");
            self.stats.write().lock_skips += 1;
            return true;
        }

        info!(symbol = %pair.canonical, direction = %signal.direction, "Dispatching trade session");
        self.stats.write().sessions_started += 1;
        let session = TradeSession::new(self.ctx.clone(), pair.clone(), signal.direction);
        self.sessions.spawn(session.run());
        true
    }

    /// Fast re-checks after an alert. Any re-check at or above the alert
    /// threshold confirms it.
    async fn recheck(&self, pair: &TradingPair, signal: DirectionalSpread) -> bool {
        let scanner = &self.ctx.config.scanner;
        if scanner.confirm_retries == 0 {
            return true;
        }
        let evaluator = self.ctx.evaluator();
        for attempt in 1..=scanner.confirm_retries {
            tokio::time::sleep(scanner.confirm_retry()).await;
            let spread = match self.ctx.fetch_sample(pair).await {
                Ok(sample) => evaluator.spread_for(&sample, signal.direction),
                Err(e) => {
                    debug!(symbol = %pair.canonical, error = %e, "Re-check sample unavailable");
                    None
                }
            };
            debug!(symbol = %pair.canonical, attempt, spread = ?spread, "Alert re-check");
            if spread.is_some_and(|s| s >= scanner.alert_threshold_pct) {
                return true;
            }
        }
        false
    }

    fn reap_sessions(&mut self) {
        while let Some(result) = self.sessions.try_join_next() {
            self.record(result);
        }
    }

    async fn drain_sessions(&mut self) {
        if !self.sessions.is_empty() {
            info!(running = self.sessions.len(), "Waiting for trade sessions to finish");
        }
        while let Some(result) = self.sessions.join_next().await {
            self.record(result);
        }
    }

    fn record(&self, result: Result<TradeOutcome, JoinError>) {
        match result {
            Ok(outcome) => {
                debug!(outcome = ?outcome, "Trade session finished");
                self.stats.write().record_outcome(&outcome);
            }
            Err(e) => error!(error = %e, "Trade session task failed"),
        }
    }
}
