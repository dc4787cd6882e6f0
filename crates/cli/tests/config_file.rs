//! The shipped configuration file loads and matches the built-in defaults.

use rust_decimal_macros::dec;
use spread_arb_core::{AppConfig, ConfigLoader, RunMode};

fn shipped_config() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/spread-arb.toml")
}

#[test]
fn test_shipped_config_loads() {
    let config = ConfigLoader::load_from(shipped_config()).expect("config loads");

    assert_eq!(config.mode, RunMode::Monitor);
    assert_eq!(config.strategy.entry_spread_pct, dec!(5));
    assert_eq!(config.strategy.abort_spread_pct, dec!(2));
    assert_eq!(config.strategy.profit_target_pct, dec!(2.5));
    assert_eq!(config.venue_a.kind, "binance");
    assert_eq!(config.venue_b.kind, "kucoin");
}

#[test]
fn test_shipped_config_matches_defaults() {
    let shipped = ConfigLoader::load_from(shipped_config()).expect("config loads");
    let defaults = AppConfig::default();

    assert_eq!(shipped.strategy.notional_usd, defaults.strategy.notional_usd);
    assert_eq!(shipped.strategy.exit_epsilon_pct, defaults.strategy.exit_epsilon_pct);
    assert_eq!(shipped.execution.max_mismatch_pct, defaults.execution.max_mismatch_pct);
    assert_eq!(shipped.scanner.alert_threshold_pct, defaults.scanner.alert_threshold_pct);
    assert_eq!(shipped.venue_b.taker_fee_rate, defaults.venue_b.taker_fee_rate);
}
