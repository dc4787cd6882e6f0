use clap::{Parser, Subcommand};

mod commands;

use commands::{RunArgs, ShowConfigArgs, SpreadArgs};

#[derive(Parser)]
#[command(name = "spread-arb")]
#[command(about = "Cross-venue perpetual futures spread arbitrage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan both venues and trade confirmed spreads
    Run(RunArgs),
    /// Print the current spread for one symbol
    Spread(SpreadArgs),
    /// Print the resolved configuration
    ShowConfig(ShowConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &cli.command {
        Commands::Run(RunArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Spread(args) => commands::spread::run(args).await,
        Commands::ShowConfig(args) => commands::show_config::run(&args),
    }
}
