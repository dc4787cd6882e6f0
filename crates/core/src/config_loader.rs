use crate::config::{AppConfig, ConfigError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default location of the TOML configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/spread-arb.toml";

/// Environment variable prefix. Nested keys use `__`, e.g.
/// `SPREAD_ARB_STRATEGY__ENTRY_SPREAD_PCT=4.5`.
pub const ENV_PREFIX: &str = "SPREAD_ARB_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn load() -> Result<AppConfig, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Merges built-in defaults, the TOML file at `path` (if present) and
    /// `SPREAD_ARB_*` environment variables, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = Self::figment(path.as_ref()).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectionFilter, RunMode};
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("does-not-exist.toml").unwrap();
            assert_eq!(config.strategy.entry_spread_pct, dec!(5));
            assert_eq!(config.venue_b.kind, "kucoin");
            Ok(())
        });
    }

    #[test]
    fn test_toml_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "spread-arb.toml",
                r#"
                mode = "paper"

                [strategy]
                entry_spread_pct = 4.5
                directions = "long_a_short_b"

                [watcher]
                poll_ms = 250
                "#,
            )?;
            let config = ConfigLoader::load_from("spread-arb.toml").unwrap();
            assert_eq!(config.mode, RunMode::Paper);
            assert_eq!(config.strategy.entry_spread_pct, dec!(4.5));
            assert_eq!(config.strategy.directions, DirectionFilter::LongAShortB);
            assert_eq!(config.strategy.abort_spread_pct, dec!(2));
            assert_eq!(config.watcher.poll_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("spread-arb.toml", "[strategy]\nnotional_usd = 100\n")?;
            jail.set_env("SPREAD_ARB_STRATEGY__NOTIONAL_USD", "75");
            jail.set_env("SPREAD_ARB_EXECUTION__CLOSE_TIMEOUT_MS", "5000");
            let config = ConfigLoader::load_from("spread-arb.toml").unwrap();
            assert_eq!(config.strategy.notional_usd, dec!(75));
            assert_eq!(config.execution.close_timeout_ms, 5000);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("spread-arb.toml", "[strategy]\nabort_spread_pct = 7\n")?;
            let result = ConfigLoader::load_from("spread-arb.toml");
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }
}
