//! End-to-end synchronous run: estimate, optimize, constrain, measure,
//! rebalance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::config::EngineConfig;
use crate::constraints::{apply_constraints, ConstraintInput, SectorCaps};
use crate::estimation::{estimate, DroppedSymbol, EstimationInput};
use crate::metrics::{compute_metrics, MetricsBundle, MetricsInput};
use crate::optimization::{
    optimize, MethodKind, OptimizationInput, OptimizationMethod, WeightBounds,
};
use crate::rebalancing::{generate_rebalancing, RebalanceInput, RebalancingAction};
use crate::types::{AssetSeries, PortfolioSnapshot, Weight};
use crate::EngineResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Caller-supplied limits beyond the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConstraints {
    /// Per-asset caps; the configured default cap applies when absent.
    pub asset_caps: Option<WeightBounds>,
    pub sector_caps: Option<SectorCaps>,
}

/// Everything one synchronous run needs, collaborator data already fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    pub portfolio_id: String,
    pub method: OptimizationMethod,
    #[serde(default)]
    pub risk_tolerance: Decimal,
    #[serde(default)]
    pub target_return: Option<Decimal>,
    #[serde(default)]
    pub constraints: PortfolioConstraints,
    /// Lookback override; the configured lookback applies when absent.
    #[serde(default)]
    pub lookback_days: Option<u32>,
    pub series: Vec<AssetSeries>,
    pub snapshot: PortfolioSnapshot,
}

/// Successful optimization outcome handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub success: bool,
    pub portfolio_id: String,
    pub method: MethodKind,
    pub weights: BTreeMap<String, Weight>,
    pub expected_return: Decimal,
    pub expected_volatility: Decimal,
    pub sharpe_ratio: Option<Decimal>,
    pub metrics: MetricsBundle,
    pub rebalancing_actions: Vec<RebalancingAction>,
    pub turnover: Decimal,
    /// Statistics had to be sanitized; treat with care.
    pub degraded: bool,
    pub dropped_symbols: Vec<DroppedSymbol>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every stage in order. Any stage error aborts the run; no partial
/// report is produced.
pub fn run_pipeline(
    input: &PipelineInput,
    config: &EngineConfig,
) -> EngineResult<OptimizationReport> {
    config.validate()?;
    info!(
        portfolio_id = %input.portfolio_id,
        method = %input.method.kind(),
        symbols = input.series.len(),
        "starting optimization run"
    );
    let mut warnings: Vec<String> = Vec::new();

    // --- Estimate ---
    let est_out = estimate(&EstimationInput {
        series: input.series.clone(),
        lookback_days: input.lookback_days.unwrap_or(config.lookback_days),
        periods_per_year: Some(config.periods_per_year),
    })?;
    warnings.extend(est_out.warnings);
    let est = est_out.result;

    // --- Optimize ---
    let bounds = input
        .constraints
        .asset_caps
        .clone()
        .unwrap_or_else(|| WeightBounds::uniform(config.default_asset_cap));
    let opt_input = OptimizationInput {
        method: input.method.clone().with_config_defaults(config),
        symbols: est.symbols.clone(),
        expected_returns: est.expected_returns.clone(),
        covariance_matrix: est.covariance_matrix.clone(),
        risk_tolerance: input.risk_tolerance,
        target_return: input.target_return,
        bounds: bounds.clone(),
        solver: config.solver.clone(),
    };
    let opt_out = optimize(&opt_input)?;
    warnings.extend(opt_out.warnings);
    let allocation = opt_out.result;
    allocation.require_converged()?;

    // --- Constrain ---
    let con_out = apply_constraints(&ConstraintInput {
        allocation,
        asset_caps: Some(bounds),
        sector_caps: input.constraints.sector_caps.clone(),
    })?;
    warnings.extend(con_out.warnings);
    let mut allocation = con_out.result;
    allocation.refresh_statistics(&est.expected_returns, &est.covariance_matrix);

    // --- Metrics ---
    let total_value = input.snapshot.total_value();
    let mut metrics_input = MetricsInput::from_allocation(&allocation, &est, config);
    if total_value > Decimal::ZERO {
        metrics_input.portfolio_value = Some(total_value);
    }
    let met_out = compute_metrics(&metrics_input)?;
    warnings.extend(met_out.warnings);
    let metrics = met_out.result;

    // --- Rebalance ---
    let weights: BTreeMap<String, Weight> = allocation
        .weights
        .iter()
        .map(|w| (w.symbol.clone(), w.weight))
        .collect();
    let reb_out = generate_rebalancing(&RebalanceInput {
        target_weights: weights.clone(),
        snapshot: input.snapshot.clone(),
        materiality_threshold: Some(config.materiality_threshold),
        high_priority_threshold: Some(config.high_priority_threshold),
    })?;
    warnings.extend(reb_out.warnings);
    let plan = reb_out.result;

    info!(
        portfolio_id = %input.portfolio_id,
        actions = plan.actions.len(),
        degraded = est.degraded,
        "optimization run complete"
    );

    Ok(OptimizationReport {
        success: true,
        portfolio_id: input.portfolio_id.clone(),
        method: allocation.method,
        weights,
        expected_return: allocation.expected_return.unwrap_or(metrics.portfolio_return),
        expected_volatility: allocation.expected_volatility.unwrap_or(metrics.volatility),
        sharpe_ratio: metrics.sharpe_ratio,
        metrics,
        rebalancing_actions: plan.actions,
        turnover: plan.turnover,
        degraded: est.degraded,
        dropped_symbols: est.dropped,
        warnings,
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
