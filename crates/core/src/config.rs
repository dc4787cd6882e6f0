use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: RunMode,
    pub strategy: StrategyConfig,
    pub execution: ExecutionConfig,
    pub watcher: WatcherConfig,
    pub scanner: ScannerConfig,
    pub venue_a: VenueConfig,
    pub venue_b: VenueConfig,
}

impl Default for AppConfig {
    /// Binance as venue A, KuCoin as venue B.
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            strategy: StrategyConfig::default(),
            execution: ExecutionConfig::default(),
            watcher: WatcherConfig::default(),
            scanner: ScannerConfig::default(),
            venue_a: VenueConfig::binance(),
            venue_b: VenueConfig::kucoin(),
        }
    }
}

/// Whether detected opportunities are traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Scan and alert only.
    #[default]
    Monitor,
    /// Trade against simulated gateways priced from the live feeds.
    Paper,
}

/// Directions the engine is allowed to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionFilter {
    #[default]
    Both,
    LongAShortB,
    LongBShortA,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Target USD notional per leg.
    pub notional_usd: Decimal,
    pub leverage: u32,
    /// Spreads below this are not signals at all.
    pub min_signal_pct: Decimal,
    pub entry_spread_pct: Decimal,
    pub abort_spread_pct: Decimal,
    pub profit_target_pct: Decimal,
    /// Exit also fires when the exit spread is within this distance of zero.
    pub exit_epsilon_pct: Decimal,
    pub entry_confirmations: u32,
    pub exit_confirmations: u32,
    pub entry_poll_ms: u64,
    pub exit_poll_ms: u64,
    /// Entry confirmation gives up after this long without firing.
    pub entry_confirm_timeout_ms: u64,
    pub directions: DirectionFilter,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            notional_usd: Decimal::from(50),
            leverage: 5,
            min_signal_pct: Decimal::new(25, 2),
            entry_spread_pct: Decimal::from(5),
            abort_spread_pct: Decimal::from(2),
            profit_target_pct: Decimal::new(25, 1),
            exit_epsilon_pct: Decimal::new(2, 2),
            entry_confirmations: 3,
            exit_confirmations: 3,
            entry_poll_ms: 100,
            exit_poll_ms: 100,
            entry_confirm_timeout_ms: 30_000,
            directions: DirectionFilter::Both,
        }
    }
}

impl StrategyConfig {
    pub fn entry_poll(&self) -> Duration {
        Duration::from_millis(self.entry_poll_ms)
    }

    pub fn exit_poll(&self) -> Duration {
        Duration::from_millis(self.exit_poll_ms)
    }

    pub fn entry_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.entry_confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long to wait for a market order to reach a terminal status.
    pub order_timeout_ms: u64,
    /// Filled legs within this relative mismatch are accepted as-is.
    pub max_mismatch_pct: Decimal,
    /// Absolute notional tolerance for matching and rebalancing.
    pub match_tolerance_usd: Decimal,
    /// Rebalance gaps smaller than this are left alone.
    pub min_rebalance_usd: Decimal,
    pub matcher_max_iterations: u32,
    pub close_timeout_ms: u64,
    pub close_poll_ms: u64,
    /// Retries for position reads during a flatten.
    pub position_read_retries: u32,
    pub paper_slippage_bps: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: 10_000,
            max_mismatch_pct: Decimal::new(5, 1),
            match_tolerance_usd: Decimal::new(50, 2),
            min_rebalance_usd: Decimal::new(50, 2),
            matcher_max_iterations: 100_000,
            close_timeout_ms: 20_000,
            close_poll_ms: 500,
            position_read_retries: 2,
            paper_slippage_bps: Decimal::ZERO,
        }
    }
}

impl ExecutionConfig {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn close_poll(&self) -> Duration {
        Duration::from_millis(self.close_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_ms: u64,
    /// Consecutive zero readings on one leg that count as liquidation.
    pub zero_confirmations: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            zero_confirmations: 2,
        }
    }
}

impl WatcherConfig {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Spread that triggers an alert and an entry attempt.
    pub alert_threshold_pct: Decimal,
    pub alert_cooldown_ms: u64,
    pub window_ms: u64,
    pub monitor_poll_ms: u64,
    /// Fast re-checks required before an alert is raised.
    pub confirm_retries: u32,
    pub confirm_retry_ms: u64,
    /// Emit a heartbeat every this many windows.
    pub heartbeat_windows: u64,
    pub max_concurrent_fetches: usize,
    /// Delay before retrying a failed symbol discovery.
    pub discovery_retry_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            alert_threshold_pct: Decimal::from(5),
            alert_cooldown_ms: 60_000,
            window_ms: 60_000,
            monitor_poll_ms: 2_000,
            confirm_retries: 2,
            confirm_retry_ms: 500,
            heartbeat_windows: 20,
            max_concurrent_fetches: 16,
            discovery_retry_ms: 5_000,
        }
    }
}

impl ScannerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    pub fn confirm_retry(&self) -> Duration {
        Duration::from_millis(self.confirm_retry_ms)
    }

    pub fn discovery_retry(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_ms)
    }
}

/// Connection settings for one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Adapter to use: `binance` or `kucoin`.
    pub kind: String,
    pub base_url: String,
    pub taker_fee_rate: Decimal,
    pub request_timeout_ms: u64,
    pub requests_per_second: u32,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self::binance()
    }
}

impl VenueConfig {
    pub fn binance() -> Self {
        Self {
            kind: "binance".to_string(),
            base_url: "https://fapi.binance.com".to_string(),
            taker_fee_rate: Decimal::new(5, 4),
            request_timeout_ms: 6_000,
            requests_per_second: 20,
        }
    }

    pub fn kucoin() -> Self {
        Self {
            kind: "kucoin".to_string(),
            base_url: "https://api-futures.kucoin.com".to_string(),
            taker_fee_rate: Decimal::new(6, 4),
            request_timeout_ms: 6_000,
            requests_per_second: 10,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Rejects settings that would make the state machine misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if s.notional_usd <= Decimal::ZERO {
            return invalid("strategy.notional_usd must be positive");
        }
        if s.leverage == 0 {
            return invalid("strategy.leverage must be at least 1");
        }
        if s.abort_spread_pct >= s.entry_spread_pct {
            return invalid("strategy.abort_spread_pct must be below strategy.entry_spread_pct");
        }
        if s.min_signal_pct > s.entry_spread_pct {
            return invalid("strategy.min_signal_pct must not exceed strategy.entry_spread_pct");
        }
        if s.profit_target_pct <= Decimal::ZERO {
            return invalid("strategy.profit_target_pct must be positive");
        }
        if s.entry_confirmations == 0 || s.exit_confirmations == 0 {
            return invalid("confirmation thresholds must be at least 1");
        }
        if s.entry_poll_ms == 0 || s.exit_poll_ms == 0 {
            return invalid("poll intervals must be positive");
        }
        if self.watcher.zero_confirmations == 0 || self.watcher.poll_ms == 0 {
            return invalid("watcher.poll_ms and watcher.zero_confirmations must be positive");
        }
        if self.execution.max_mismatch_pct < Decimal::ZERO
            || self.execution.match_tolerance_usd < Decimal::ZERO
        {
            return invalid("execution tolerances must not be negative");
        }
        if self.execution.close_poll_ms == 0 || self.execution.order_timeout_ms == 0 {
            return invalid("execution.close_poll_ms and execution.order_timeout_ms must be positive");
        }
        if self.scanner.window_ms == 0 || self.scanner.monitor_poll_ms == 0 {
            return invalid("scanner.window_ms and scanner.monitor_poll_ms must be positive");
        }
        if self.scanner.max_concurrent_fetches == 0 {
            return invalid("scanner.max_concurrent_fetches must be positive");
        }
        if self.venue_a.kind == self.venue_b.kind {
            return invalid("venue_a and venue_b must be different venues");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.strategy.notional_usd, dec!(50));
        assert_eq!(config.strategy.entry_spread_pct, dec!(5));
        assert_eq!(config.strategy.abort_spread_pct, dec!(2));
        assert_eq!(config.strategy.profit_target_pct, dec!(2.5));
        assert_eq!(config.strategy.exit_epsilon_pct, dec!(0.02));
        assert_eq!(config.strategy.min_signal_pct, dec!(0.25));
        assert_eq!(config.execution.max_mismatch_pct, dec!(0.5));
        assert_eq!(config.execution.min_rebalance_usd, dec!(0.50));
        assert_eq!(config.watcher.zero_confirmations, 2);
        assert_eq!(config.mode, RunMode::Monitor);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_abort_above_entry() {
        let mut config = AppConfig::default();
        config.strategy.abort_spread_pct = dec!(6);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_same_venue() {
        let mut config = AppConfig::default();
        config.venue_b = VenueConfig::binance();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = AppConfig::default();
        config.strategy.exit_confirmations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.strategy.entry_poll(), Duration::from_millis(100));
        assert_eq!(config.execution.close_timeout(), Duration::from_secs(20));
        assert_eq!(config.watcher.poll(), Duration::from_millis(500));
    }
}
