mod commands;
mod input;
mod output;
mod settings;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::analytics::StageArgs;
use commands::optimize::OptimizeArgs;
use portfolio_engine_core::EngineError;

/// Portfolio optimization, risk analytics and rebalancing
#[derive(Parser)]
#[command(
    name = "pfe",
    version,
    about = "Portfolio optimization, risk analytics and rebalancing",
    long_about = "Estimates return statistics from closing prices, computes long-only \
                  allocations (mean-variance, view-adjusted, risk parity, minimum variance), \
                  applies asset and sector caps, reports risk metrics and proposes \
                  rebalancing trades, all in decimal arithmetic."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Engine configuration file (TOML, YAML or JSON); PFE_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a workspace of prices and positions
    Optimize(OptimizeArgs),
    /// Estimate annualized returns and covariance from closing prices
    Estimate(StageArgs),
    /// Compute an allocation from returns and covariance
    Allocate(StageArgs),
    /// Apply asset and sector caps to an allocation
    Constrain(StageArgs),
    /// Risk and performance metrics for a set of weights
    Metrics(StageArgs),
    /// Trades that move a portfolio snapshot to target weights
    Rebalance(StageArgs),
    /// Print the effective engine configuration
    ShowConfig,
    /// Print version information
    Version,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Optimize(_) => "optimize",
            Commands::Estimate(_) => "estimate",
            Commands::Allocate(_) => "allocate",
            Commands::Constrain(_) => "constrain",
            Commands::Metrics(_) => "metrics",
            Commands::Rebalance(_) => "rebalance",
            Commands::ShowConfig => "show-config",
            Commands::Version => "version",
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let config = match settings::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => fail(e),
    };

    debug!(command = cli.command.name(), output = ?cli.output, "dispatching command");
    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Optimize(args) => commands::optimize::run_optimize(args, &config).await,
        Commands::Estimate(args) => commands::analytics::run_estimate(args),
        Commands::Allocate(args) => commands::analytics::run_allocate(args),
        Commands::Constrain(args) => commands::analytics::run_constrain(args),
        Commands::Metrics(args) => commands::analytics::run_metrics(args),
        Commands::Rebalance(args) => commands::analytics::run_rebalance(args),
        Commands::ShowConfig => serde_json::to_value(&config).map_err(Into::into),
        Commands::Version => {
            println!("pfe {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => fail(e),
    }
}

/// Engine failures print their structured report; anything else is a
/// plain message.
fn fail(e: Box<dyn std::error::Error>) -> ! {
    match e.downcast_ref::<EngineError>() {
        Some(engine) => {
            let report = serde_json::to_string_pretty(&engine.report())
                .unwrap_or_else(|_| engine.to_string());
            eprintln!("{}: {}", "error".red().bold(), report);
        }
        None => eprintln!("{}: {}", "error".red().bold(), e),
    }
    process::exit(1);
}
