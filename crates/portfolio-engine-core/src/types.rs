use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Fraction of total portfolio value held in one asset.
pub type Weight = Decimal;

/// A single closing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub date: NaiveDate,
    pub close: Money,
}

/// Closing-price history for one symbol, dates strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
    pub symbol: String,
    pub observations: Vec<PriceObservation>,
}

impl AssetSeries {
    pub fn new(symbol: impl Into<String>, observations: Vec<PriceObservation>) -> Self {
        AssetSeries {
            symbol: symbol.into(),
            observations,
        }
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.observations.last().map(|o| o.date)
    }
}

/// Weight held in a single asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetWeight {
    pub symbol: String,
    pub weight: Weight,
}

/// A position as reported by the position store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
}

/// Quantity held and last known price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub quantity: Decimal,
    pub last_price: Money,
}

/// Read-only view of an existing portfolio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub holdings: BTreeMap<String, Holding>,
}

impl Holding {
    pub fn market_value(&self) -> Money {
        self.quantity * self.last_price
    }
}

impl PortfolioSnapshot {
    pub fn total_value(&self) -> Money {
        self.holdings.values().map(Holding::market_value).sum()
    }

    /// Current weight per symbol; all zero when the portfolio has no value.
    pub fn current_weights(&self) -> BTreeMap<String, Weight> {
        let total = self.total_value();
        self.holdings
            .iter()
            .map(|(symbol, h)| {
                let w = if total.is_zero() {
                    Decimal::ZERO
                } else {
                    h.market_value() / total
                };
                (symbol.clone(), w)
            })
            .collect()
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
