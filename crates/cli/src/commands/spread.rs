//! One-shot spread readout for a single symbol.

use anyhow::{anyhow, Result};
use clap::Args;
use tracing::info;

use spread_arb_core::config_loader::DEFAULT_CONFIG_PATH;
use spread_arb_core::{Direction, Leg, SpreadSample, SymbolSource};
use spread_arb_cross::SpreadEvaluator;
use spread_arb_venues::{connect, normalize_symbol, CommonSymbols};

#[derive(Args, Debug)]
pub struct SpreadArgs {
    /// Symbol on either venue, e.g. BTCUSDT or XBTUSDTM
    #[arg(short, long)]
    pub symbol: String,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

pub async fn run(args: SpreadArgs) -> Result<()> {
    let config = super::load_config(&args.config)?;
    let a = connect(&config.venue_a)?;
    let b = connect(&config.venue_b)?;

    let canonical = normalize_symbol(&args.symbol);
    let pairs = CommonSymbols::new(a.contracts.clone(), b.contracts.clone())
        .trading_pairs()
        .await?;
    let pair = pairs
        .into_iter()
        .find(|p| p.canonical == canonical)
        .ok_or_else(|| {
            anyhow!(
                "{canonical} is not listed on both {} and {}",
                config.venue_a.kind,
                config.venue_b.kind
            )
        })?;

    let (quote_a, quote_b) = tokio::join!(
        a.feed.top_of_book(pair.symbol(Leg::A)),
        b.feed.top_of_book(pair.symbol(Leg::B)),
    );
    let sample = SpreadSample::new(quote_a?, quote_b?);

    info!(
        symbol = %pair.canonical,
        venue_a = a.feed.venue(),
        a_symbol = pair.symbol(Leg::A),
        a_bid = %sample.a.bid,
        a_ask = %sample.a.ask,
        venue_b = b.feed.venue(),
        b_symbol = pair.symbol(Leg::B),
        b_bid = %sample.b.bid,
        b_ask = %sample.b.ask,
        "Top of book"
    );

    let evaluator = SpreadEvaluator::new(config.strategy.min_signal_pct, config.strategy.directions);
    for direction in Direction::ALL {
        if let Some(spread_pct) = evaluator.spread_for(&sample, direction) {
            println!("{:<6} {direction}: {:.4}%", pair.canonical, spread_pct);
        }
    }
    match evaluator.evaluate(&sample) {
        Some(best) if best.value_pct >= config.strategy.entry_spread_pct => {
            println!("signal: {} at {:.4}% (entry threshold met)", best.direction, best.value_pct);
        }
        Some(best) => {
            println!("signal: {} at {:.4}% (below entry threshold)", best.direction, best.value_pct);
        }
        None => println!("no signal"),
    }
    Ok(())
}
