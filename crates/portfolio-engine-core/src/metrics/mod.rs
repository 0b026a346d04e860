pub mod performance;
pub mod risk;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::estimation::MarketEstimate;
use crate::math::{portfolio_std, validate_covariance_matrix, vec_dot};
use crate::optimization::AllocationResult;
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::EngineResult;

pub use self::performance::SortinoBasis;
pub use self::risk::RiskContribution;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

fn default_risk_free_rate() -> Rate {
    dec!(0.02)
}

fn default_confidence() -> Decimal {
    dec!(0.95)
}

fn default_periods_per_year() -> u32 {
    252
}

fn default_drawdown_multiplier() -> Decimal {
    dec!(2.5)
}

/// Input to risk and performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsInput {
    pub symbols: Vec<String>,
    pub weights: Vec<Decimal>,
    /// Annualized expected returns the allocation is evaluated against.
    pub expected_returns: Vec<Decimal>,
    pub covariance_matrix: Vec<Vec<Decimal>>,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: Rate,
    /// VaR / CVaR confidence level, e.g. 0.95.
    #[serde(default = "default_confidence")]
    pub confidence_level: Decimal,
    /// Historical per-period returns (periods x assets) for downside deviation.
    #[serde(default)]
    pub periodic_returns: Option<Vec<Vec<Decimal>>>,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,
    #[serde(default = "default_drawdown_multiplier")]
    pub drawdown_multiplier: Decimal,
    /// Portfolio market value for monetary VaR.
    #[serde(default)]
    pub portfolio_value: Option<Money>,
}

impl MetricsInput {
    /// Evaluate a converged allocation against the estimate it came from.
    /// Posterior returns are used when the allocation carries them.
    pub fn from_allocation(
        allocation: &AllocationResult,
        estimate: &MarketEstimate,
        config: &EngineConfig,
    ) -> Self {
        MetricsInput {
            symbols: estimate.symbols.clone(),
            weights: allocation.weight_vector(),
            expected_returns: allocation
                .effective_returns(&estimate.expected_returns)
                .to_vec(),
            covariance_matrix: estimate.covariance_matrix.clone(),
            risk_free_rate: config.risk_free_rate,
            confidence_level: config.var_confidence,
            periodic_returns: Some(estimate.periodic_returns.clone()),
            periods_per_year: estimate.periods_per_year,
            drawdown_multiplier: config.drawdown_multiplier,
            portfolio_value: None,
        }
    }
}

/// Risk and performance figures for one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub portfolio_return: Decimal,
    pub volatility: Decimal,
    /// `None` when volatility is zero.
    pub sharpe_ratio: Option<Decimal>,
    pub sortino_ratio: Option<Decimal>,
    pub sortino_basis: SortinoBasis,
    pub confidence_level: Decimal,
    /// Parametric VaR as a positive loss fraction.
    pub value_at_risk: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_at_risk_amount: Option<Money>,
    /// Parametric expected shortfall as a positive loss fraction.
    pub expected_shortfall: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_shortfall_amount: Option<Money>,
    /// `None` when volatility is zero.
    pub diversification_ratio: Option<Decimal>,
    pub herfindahl_index: Decimal,
    /// 1 / HHI
    pub effective_number_of_assets: Option<Decimal>,
    /// Approximation: multiplier x volatility, not a historical drawdown.
    pub max_drawdown_proxy: Decimal,
    pub risk_contributions: Vec<RiskContribution>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compute risk and performance metrics for a weight vector.
pub fn compute_metrics(input: &MetricsInput) -> EngineResult<ComputationOutput<MetricsBundle>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = input.symbols.len();
    validate_input(input, n)?;

    let w = &input.weights;
    let cov = &input.covariance_matrix;
    let rf = input.risk_free_rate;

    let weight_sum: Decimal = w.iter().sum();
    if (weight_sum - Decimal::ONE).abs() > dec!(0.000001) {
        warnings.push(format!("Weights sum to {}, not 1", weight_sum));
    }

    let portfolio_return = vec_dot(w, &input.expected_returns);
    let volatility = portfolio_std(w, cov);
    if volatility.is_zero() {
        warnings.push("Portfolio volatility is zero; ratios are undefined".into());
    }

    let sharpe_ratio = performance::sharpe_ratio(portfolio_return, rf, volatility);

    let path = input
        .periodic_returns
        .as_ref()
        .map(|rows| performance::portfolio_path(w, rows));
    let (sortino_ratio, sortino_basis) = performance::sortino_ratio(
        portfolio_return,
        rf,
        volatility,
        path.as_deref(),
        input.periods_per_year,
    );
    if sortino_basis == SortinoBasis::VolatilityProxy {
        warnings.push(
            "No return history supplied; Sortino uses total volatility and equals Sharpe".into(),
        );
    }

    let tail = risk::parametric_tail(volatility, input.confidence_level)?;
    let amount = |fraction: Decimal| input.portfolio_value.map(|v| fraction * v);

    let diversification_ratio = performance::diversification_ratio(w, cov, volatility);
    let herfindahl_index = performance::herfindahl_index(w);
    let effective_number_of_assets = if herfindahl_index.is_zero() {
        None
    } else {
        Some(Decimal::ONE / herfindahl_index)
    };

    let max_drawdown_proxy = risk::max_drawdown_proxy(volatility, input.drawdown_multiplier);
    warnings.push(format!(
        "Max drawdown is an approximation ({} x volatility), not a historical drawdown",
        input.drawdown_multiplier
    ));

    let output = MetricsBundle {
        portfolio_return,
        volatility,
        sharpe_ratio,
        sortino_ratio,
        sortino_basis,
        confidence_level: input.confidence_level,
        value_at_risk: tail.value_at_risk,
        value_at_risk_amount: amount(tail.value_at_risk),
        expected_shortfall: tail.expected_shortfall,
        expected_shortfall_amount: amount(tail.expected_shortfall),
        diversification_ratio,
        herfindahl_index,
        effective_number_of_assets,
        max_drawdown_proxy,
        risk_contributions: risk::contributions(&input.symbols, w, cov, volatility),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Parametric (Gaussian) risk metrics",
        &serde_json::json!({
            "risk_free_rate": rf.to_string(),
            "confidence_level": input.confidence_level.to_string(),
            "periods_per_year": input.periods_per_year,
            "drawdown_multiplier": input.drawdown_multiplier.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_input(input: &MetricsInput, n: usize) -> EngineResult<()> {
    if n == 0 {
        return Err(EngineError::configuration(
            "symbols",
            "At least one asset required",
        ));
    }
    if input.weights.len() != n {
        return Err(EngineError::configuration(
            "weights",
            format!("Expected {} weights but got {}", n, input.weights.len()),
        ));
    }
    if input.expected_returns.len() != n {
        return Err(EngineError::configuration(
            "expected_returns",
            format!(
                "Expected {} values but got {}",
                n,
                input.expected_returns.len()
            ),
        ));
    }
    validate_covariance_matrix(&input.covariance_matrix, n)?;
    if let Some(rows) = &input.periodic_returns {
        if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(EngineError::configuration(
                "periodic_returns",
                format!("Row {} has {} columns, expected {}", t, row.len(), n),
            ));
        }
    }
    if input.periods_per_year == 0 {
        return Err(EngineError::configuration(
            "periods_per_year",
            "must be positive",
        ));
    }
    if input.drawdown_multiplier <= Decimal::ZERO {
        return Err(EngineError::configuration(
            "drawdown_multiplier",
            "must be positive",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
