//! Collaborator interfaces and in-memory implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::types::{AssetSeries, Position};
use crate::EngineResult;

/// Source of closing-price history.
///
/// Implementations return time-ordered, de-duplicated observations; the
/// engine validates but never repairs them.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn get_historical_closes(
        &self,
        symbols: &[String],
        lookback_days: u32,
    ) -> EngineResult<Vec<AssetSeries>>;
}

/// Source of current holdings and prices.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get_positions(&self, portfolio_id: &str) -> EngineResult<Vec<Position>>;

    async fn get_latest_price(&self, symbol: &str) -> EngineResult<Decimal>;
}

/// Price history held in memory, keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceHistory {
    series: BTreeMap<String, AssetSeries>,
}

impl InMemoryPriceHistory {
    pub fn new(series: Vec<AssetSeries>) -> Self {
        InMemoryPriceHistory {
            series: series.into_iter().map(|s| (s.symbol.clone(), s)).collect(),
        }
    }
}

#[async_trait]
impl PriceHistoryProvider for InMemoryPriceHistory {
    /// Unknown symbols come back with no observations, so the estimator
    /// drops them with a warning instead of failing the request.
    async fn get_historical_closes(
        &self,
        symbols: &[String],
        _lookback_days: u32,
    ) -> EngineResult<Vec<AssetSeries>> {
        Ok(symbols
            .iter()
            .map(|s| {
                self.series
                    .get(s)
                    .cloned()
                    .unwrap_or_else(|| AssetSeries::new(s.clone(), Vec::new()))
            })
            .collect())
    }
}

/// Positions per portfolio and a flat price table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPositionStore {
    positions: BTreeMap<String, Vec<Position>>,
    prices: BTreeMap<String, Decimal>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_portfolio(mut self, portfolio_id: impl Into<String>, positions: Vec<Position>) -> Self {
        self.positions.insert(portfolio_id.into(), positions);
        self
    }

    pub fn with_price(mut self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(symbol.into(), price);
        self
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn get_positions(&self, portfolio_id: &str) -> EngineResult<Vec<Position>> {
        self.positions.get(portfolio_id).cloned().ok_or_else(|| {
            EngineError::collaborator(
                "position_store",
                format!("unknown portfolio {}", portfolio_id),
            )
        })
    }

    async fn get_latest_price(&self, symbol: &str) -> EngineResult<Decimal> {
        self.prices.get(symbol).copied().ok_or_else(|| {
            EngineError::collaborator("position_store", format!("no price for {}", symbol))
        })
    }
}
