use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use portfolio_engine_core::service::{
    optimize_portfolio, optimize_portfolio_with_timeout, InMemoryPositionStore,
    InMemoryPriceHistory, OptimizationRequest,
};
use portfolio_engine_core::{AssetSeries, EngineConfig, Position};

use crate::input;

/// Arguments for a full optimization run
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to a workspace file: prices, positions and the request
    #[arg(long)]
    pub input: Option<String>,

    /// Abort the run after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Everything the in-memory collaborators serve for one run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub request: OptimizationRequest,
    pub prices: Vec<AssetSeries>,
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Latest price per symbol; the last close of its series otherwise.
    #[serde(default)]
    pub latest_prices: BTreeMap<String, Decimal>,
}

impl Workspace {
    fn collaborators(&self) -> (InMemoryPriceHistory, InMemoryPositionStore) {
        let mut store = InMemoryPositionStore::new()
            .with_portfolio(self.request.portfolio_id.clone(), self.positions.clone());
        for s in &self.prices {
            if let Some(last) = s.observations.last() {
                store = store.with_price(s.symbol.clone(), last.close);
            }
        }
        for (symbol, price) in &self.latest_prices {
            store = store.with_price(symbol.clone(), *price);
        }
        (InMemoryPriceHistory::new(self.prices.clone()), store)
    }
}

pub async fn run_optimize(
    args: OptimizeArgs,
    config: &EngineConfig,
) -> Result<Value, Box<dyn std::error::Error>> {
    let workspace: Workspace = input::load(&args.input)?;
    let (prices, store) = workspace.collaborators();

    let report = match args.timeout_ms {
        Some(ms) => {
            optimize_portfolio_with_timeout(
                &workspace.request,
                &prices,
                &store,
                config,
                Duration::from_millis(ms),
            )
            .await?
        }
        None => optimize_portfolio(&workspace.request, &prices, &store, config).await?,
    };
    Ok(serde_json::to_value(report)?)
}
