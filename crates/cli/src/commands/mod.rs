pub mod run;
pub mod show_config;
pub mod spread;

use anyhow::{Context, Result};
use spread_arb_core::{AppConfig, ConfigLoader};

pub use run::RunArgs;
pub use show_config::ShowConfigArgs;
pub use spread::SpreadArgs;

/// Loads defaults, the TOML file and `SPREAD_ARB_*` overrides.
pub(crate) fn load_config(path: &str) -> Result<AppConfig> {
    ConfigLoader::load_from(path).with_context(|| format!("loading configuration from {path}"))
}
