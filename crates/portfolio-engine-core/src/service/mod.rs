//! Async boundary: fetch collaborator data, then run the synchronous
//! pipeline off the runtime's worker threads.

pub mod providers;

pub use providers::{InMemoryPositionStore, InMemoryPriceHistory, PositionStore, PriceHistoryProvider};

use futures::future::try_join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::optimization::OptimizationMethod;
use crate::pipeline::{run_pipeline, OptimizationReport, PipelineInput, PortfolioConstraints};
use crate::types::{Holding, PortfolioSnapshot, Position};
use crate::EngineResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A caller's optimization request, before any data has been fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub portfolio_id: String,
    pub method: OptimizationMethod,
    #[serde(default)]
    pub risk_tolerance: Decimal,
    #[serde(default)]
    pub target_return: Option<Decimal>,
    #[serde(default)]
    pub constraints: PortfolioConstraints,
    /// Optimization universe. Empty means "whatever the portfolio holds";
    /// held symbols outside a non-empty list are targeted at zero.
    #[serde(default)]
    pub candidate_symbols: Vec<String>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Fetch positions, history and prices, then run the full pipeline.
pub async fn optimize_portfolio(
    request: &OptimizationRequest,
    price_provider: &dyn PriceHistoryProvider,
    position_store: &dyn PositionStore,
    config: &EngineConfig,
) -> EngineResult<OptimizationReport> {
    config.validate()?;
    let lookback = request.lookback_days.unwrap_or(config.lookback_days);

    let (positions, series) = if request.candidate_symbols.is_empty() {
        let positions = position_store.get_positions(&request.portfolio_id).await?;
        let universe = held_symbols(&positions);
        if universe.is_empty() {
            return Err(EngineError::configuration(
                "candidate_symbols",
                format!(
                    "portfolio {} holds nothing and no candidates were given",
                    request.portfolio_id
                ),
            ));
        }
        let series = price_provider
            .get_historical_closes(&universe, lookback)
            .await?;
        (positions, series)
    } else {
        tokio::try_join!(
            position_store.get_positions(&request.portfolio_id),
            price_provider.get_historical_closes(&request.candidate_symbols, lookback),
        )?
    };
    debug!(
        portfolio_id = %request.portfolio_id,
        positions = positions.len(),
        series = series.len(),
        "collaborator data fetched"
    );

    let snapshot = build_snapshot(&positions, position_store).await?;

    let input = PipelineInput {
        portfolio_id: request.portfolio_id.clone(),
        method: request.method.clone(),
        risk_tolerance: request.risk_tolerance,
        target_return: request.target_return,
        constraints: request.constraints.clone(),
        lookback_days: Some(lookback),
        series,
        snapshot,
    };
    let config = config.clone();
    tokio::task::spawn_blocking(move || run_pipeline(&input, &config))
        .await
        .map_err(|e| EngineError::collaborator("runtime", format!("pipeline task failed: {}", e)))?
}

/// [`optimize_portfolio`] bounded by a wall-clock limit.
///
/// On expiry the collaborator futures are dropped; a pipeline already
/// handed to the blocking pool runs to completion and its result is
/// discarded.
pub async fn optimize_portfolio_with_timeout(
    request: &OptimizationRequest,
    price_provider: &dyn PriceHistoryProvider,
    position_store: &dyn PositionStore,
    config: &EngineConfig,
    limit: Duration,
) -> EngineResult<OptimizationReport> {
    match tokio::time::timeout(
        limit,
        optimize_portfolio(request, price_provider, position_store, config),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(portfolio_id = %request.portfolio_id, ?limit, "optimization timed out");
            Err(EngineError::Convergence {
                method: request.method.kind().to_string(),
                iterations: 0,
                message: format!("timed out after {} ms", limit.as_millis()),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn held_symbols(positions: &[Position]) -> Vec<String> {
    let mut symbols: Vec<String> = positions
        .iter()
        .filter(|p| !p.quantity.is_zero())
        .map(|p| p.symbol.clone())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Price every held symbol concurrently. Repeated symbols are merged.
async fn build_snapshot(
    positions: &[Position],
    position_store: &dyn PositionStore,
) -> EngineResult<PortfolioSnapshot> {
    let mut symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
    symbols.sort_unstable();
    symbols.dedup();

    let prices = try_join_all(symbols.iter().map(|s| position_store.get_latest_price(s))).await?;

    let mut snapshot = PortfolioSnapshot::default();
    for (symbol, price) in symbols.iter().zip(prices) {
        let quantity: Decimal = positions
            .iter()
            .filter(|p| p.symbol == *symbol)
            .map(|p| p.quantity)
            .sum();
        snapshot.holdings.insert(
            symbol.to_string(),
            Holding {
                quantity,
                last_price: price,
            },
        );
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
