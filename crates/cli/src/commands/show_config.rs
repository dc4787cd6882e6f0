//! Prints the resolved configuration.

use anyhow::Result;
use clap::Args;
use spread_arb_core::config_loader::DEFAULT_CONFIG_PATH;

#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

/// Prints defaults merged with the file and environment, as JSON.
pub fn run(args: &ShowConfigArgs) -> Result<()> {
    let config = super::load_config(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
