//! Scanner and trade sessions against the configured venues.
//!
//! In `paper` mode orders go to [`PaperGateway`]s priced from the live
//! feeds; in `monitor` mode alerts are logged and nothing is traded. The
//! command exits with an error when trading halts after a liquidation.

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use spread_arb_core::config_loader::DEFAULT_CONFIG_PATH;
use spread_arb_core::{EventSink, OrderGateway, PerLeg, PriceFeed, RunMode, TradeEvent};
use spread_arb_cross::{EngineContext, PaperGateway, PaperGatewayConfig, SpreadScanner};
use spread_arb_venues::{connect, CommonSymbols};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Log alerts without trading
    Monitor,
    /// Trade against simulated gateways
    Paper,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Monitor => RunMode::Monitor,
            ModeArg::Paper => RunMode::Paper,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Overrides the configured run mode
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Stop after this long (e.g. 30m, 2h). Runs until Ctrl+C if omitted.
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Parses a duration string like "30s", "5m", "2h" or "1d".
///
/// # Errors
/// Returns an error if the format is invalid or the number cannot be parsed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let split_idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("Duration must have a unit (s, m, h, d)"))?;
    let (num_str, unit) = s.split_at(split_idx);

    if num_str.is_empty() {
        return Err(anyhow!("Duration must start with a number"));
    }

    let value: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {}", num_str))?;

    if value == 0 {
        return Err(anyhow!("Duration cannot be zero"));
    }

    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        _ => {
            return Err(anyhow!(
                "Unknown duration unit: {}. Use s, m, h, or d",
                unit
            ))
        }
    };

    Ok(Duration::from_secs(seconds))
}

fn paper_gateway(feed: &Arc<dyn PriceFeed>, slippage_bps: Decimal) -> Arc<dyn OrderGateway> {
    Arc::new(PaperGateway::new(
        format!("{}-paper", feed.venue()),
        feed.clone(),
        PaperGatewayConfig::always_fill().with_slippage_bps(slippage_bps),
    ))
}

/// Runs the scanner until Ctrl+C, the duration elapses, or trading halts.
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = super::load_config(&args.config)?;
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;

    info!("=== Spread Arbitrage ===");
    info!(
        mode = ?config.mode,
        venue_a = %config.venue_a.kind,
        venue_b = %config.venue_b.kind,
        notional_usd = %config.strategy.notional_usd,
        leverage = config.strategy.leverage,
        entry_pct = %config.strategy.entry_spread_pct,
        abort_pct = %config.strategy.abort_spread_pct,
        target_pct = %config.strategy.profit_target_pct,
        alert_pct = %config.scanner.alert_threshold_pct,
        "Configuration"
    );

    let a = connect(&config.venue_a)?;
    let b = connect(&config.venue_b)?;
    let slippage = config.execution.paper_slippage_bps;
    let gateways = PerLeg::new(
        paper_gateway(&a.feed, slippage),
        paper_gateway(&b.feed, slippage),
    );
    let feeds = PerLeg::new(a.feed, b.feed);

    let (events, mut event_rx) = EventSink::channel();
    let event_logger = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let ctx = EngineContext::new(config, feeds, gateways, events);
    let symbols = Arc::new(CommonSymbols::new(a.contracts, b.contracts));
    let scanner = SpreadScanner::new(ctx, symbols);
    let stop_handle = scanner.stop_handle();

    let stop_on_ctrl_c = stop_handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after open sessions finish...");
            stop_on_ctrl_c.store(true, Ordering::SeqCst);
        }
    });

    if let Some(duration) = duration {
        info!(?duration, "Run duration set");
        let stop_on_deadline = stop_handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!("Duration elapsed, stopping...");
            stop_on_deadline.store(true, Ordering::SeqCst);
        });
    }

    let result = scanner.run().await;
    // The sink is dropped with the scanner, which ends the logger.
    match tokio::time::timeout(Duration::from_secs(2), event_logger).await {
        Ok(Err(e)) => warn!(error = %e, "Event logger task failed"),
        Err(_) => warn!("Event logger did not drain in time"),
        Ok(Ok(())) => {}
    }

    match result {
        Ok(stats) => {
            info!(
                windows = stats.windows,
                alerts = stats.alerts,
                sessions = stats.sessions_started,
                closed = stats.trades_closed,
                forced = stats.trades_forced,
                aborted = stats.entries_aborted,
                failed = stats.entries_failed,
                net_pnl = %stats.net_pnl,
                "Run complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run stopped");
            Err(e.into())
        }
    }
}

fn log_event(event: &TradeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(target: "spread_arb::events", "{json}"),
        Err(e) => warn!(error = %e, "Failed to serialize trade event"),
    }
}
