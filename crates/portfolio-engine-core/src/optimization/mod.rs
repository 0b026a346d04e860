pub mod mean_variance;
pub mod risk_parity;
pub mod solver;
pub mod view_adjusted;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::{EngineConfig, SolverConfig};
use crate::error::EngineError;
use crate::math::{portfolio_std, validate_covariance_matrix, vec_dot};
use crate::types::{with_metadata, AssetWeight, ComputationOutput};
use crate::EngineResult;

use self::mean_variance::VarianceObjective;
use self::risk_parity::RiskParityObjective;
use self::solver::{FeasibleSet, Objective, ReturnTarget};

pub use self::solver::SolverStatus;
pub use self::view_adjusted::{View, ViewAdjustedParams};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Allocation method and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Minimize w'Sigma w - q mu'w.
    #[serde(alias = "markowitz")]
    MeanVariance,
    /// Mean-variance on Black-Litterman posterior returns.
    #[serde(alias = "black_litterman")]
    ViewAdjusted(ViewAdjustedParams),
    /// Equalize each asset's share of portfolio variance.
    RiskParity,
    /// Minimize variance, ignoring expected returns.
    #[serde(alias = "min_variance")]
    MinimumVariance,
}

/// Method identity without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    MeanVariance,
    ViewAdjusted,
    RiskParity,
    MinimumVariance,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodKind::MeanVariance => "mean_variance",
            MethodKind::ViewAdjusted => "view_adjusted",
            MethodKind::RiskParity => "risk_parity",
            MethodKind::MinimumVariance => "minimum_variance",
        };
        f.write_str(name)
    }
}

impl OptimizationMethod {
    pub fn kind(&self) -> MethodKind {
        match self {
            OptimizationMethod::MeanVariance => MethodKind::MeanVariance,
            OptimizationMethod::ViewAdjusted(_) => MethodKind::ViewAdjusted,
            OptimizationMethod::RiskParity => MethodKind::RiskParity,
            OptimizationMethod::MinimumVariance => MethodKind::MinimumVariance,
        }
    }

    /// Fill unset view-adjusted parameters from engine configuration.
    pub fn with_config_defaults(self, config: &EngineConfig) -> Self {
        match self {
            OptimizationMethod::ViewAdjusted(mut p) => {
                p.tau.get_or_insert(config.view_tau);
                p.risk_aversion.get_or_insert(config.risk_aversion);
                p.default_confidence.get_or_insert(config.view_confidence);
                OptimizationMethod::ViewAdjusted(p)
            }
            other => other,
        }
    }
}

impl FromStr for OptimizationMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mean_variance" | "markowitz" => Ok(OptimizationMethod::MeanVariance),
            "view_adjusted" | "black_litterman" => {
                Ok(OptimizationMethod::ViewAdjusted(ViewAdjustedParams::default()))
            }
            "risk_parity" => Ok(OptimizationMethod::RiskParity),
            "minimum_variance" | "min_variance" => Ok(OptimizationMethod::MinimumVariance),
            other => Err(EngineError::configuration(
                "method",
                format!("Unknown optimization method '{}'", other),
            )),
        }
    }
}

/// Per-asset upper bounds on weight. Lower bounds are always zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightBounds {
    /// Cap applied to every asset without an override.
    pub max_weight: Decimal,
    pub per_asset: BTreeMap<String, Decimal>,
}

impl Default for WeightBounds {
    fn default() -> Self {
        WeightBounds {
            max_weight: dec!(0.4),
            per_asset: BTreeMap::new(),
        }
    }
}

impl WeightBounds {
    pub fn uniform(max_weight: Decimal) -> Self {
        WeightBounds {
            max_weight,
            per_asset: BTreeMap::new(),
        }
    }

    /// Caps in `symbols` order.
    pub fn upper_bounds(&self, symbols: &[String]) -> EngineResult<Vec<Decimal>> {
        symbols
            .iter()
            .map(|s| {
                let cap = self.per_asset.get(s).copied().unwrap_or(self.max_weight);
                if cap <= Decimal::ZERO || cap > Decimal::ONE {
                    Err(EngineError::configuration(
                        "bounds",
                        format!("cap for {} must be in (0, 1], got {}", s, cap),
                    ))
                } else {
                    Ok(cap)
                }
            })
            .collect()
    }
}

/// Input to portfolio optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationInput {
    pub method: OptimizationMethod,
    pub symbols: Vec<String>,
    /// Annualized expected return per symbol.
    pub expected_returns: Vec<Decimal>,
    /// N x N annualized covariance matrix.
    pub covariance_matrix: Vec<Vec<Decimal>>,
    /// Weight on expected return in the mean-variance objective.
    #[serde(default)]
    pub risk_tolerance: Decimal,
    /// Required portfolio return (equality constraint).
    #[serde(default)]
    pub target_return: Option<Decimal>,
    #[serde(default)]
    pub bounds: WeightBounds,
    #[serde(default)]
    pub solver: SolverConfig,
}

/// Whether a converged solution is the global optimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Optimality {
    /// Convex objective: any stationary point is optimal.
    Global,
    /// Non-convex objective: a local optimum from the equal-weight start.
    Local,
}

/// Result of one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub method: MethodKind,
    pub convergence: bool,
    pub status: SolverStatus,
    pub solver_message: String,
    pub iterations: u32,
    pub optimality: Optimality,
    /// Weights in input symbol order; empty unless converged.
    pub weights: Vec<AssetWeight>,
    pub expected_return: Option<Decimal>,
    pub expected_volatility: Option<Decimal>,
    /// Posterior returns used in place of the estimates (view-adjusted only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_returns: Option<Vec<Decimal>>,
}

impl AllocationResult {
    /// Turn a non-converged result into the matching error.
    pub fn require_converged(&self) -> EngineResult<()> {
        match self.status {
            SolverStatus::Converged => Ok(()),
            SolverStatus::Infeasible => Err(EngineError::configuration(
                "constraints",
                self.solver_message.clone(),
            )),
            SolverStatus::MaxIterations => Err(EngineError::Convergence {
                method: self.method.to_string(),
                iterations: self.iterations,
                message: self.solver_message.clone(),
            }),
        }
    }

    pub fn weight_vector(&self) -> Vec<Decimal> {
        self.weights.iter().map(|w| w.weight).collect()
    }

    pub fn weight_of(&self, symbol: &str) -> Option<Decimal> {
        self.weights
            .iter()
            .find(|w| w.symbol == symbol)
            .map(|w| w.weight)
    }

    /// Returns the allocation statistics are computed against: posterior
    /// returns when present, otherwise `fallback`.
    pub fn effective_returns<'a>(&'a self, fallback: &'a [Decimal]) -> &'a [Decimal] {
        self.adjusted_returns.as_deref().unwrap_or(fallback)
    }

    /// Recompute expected return and volatility after weights changed.
    pub fn refresh_statistics(&mut self, expected_returns: &[Decimal], covariance: &[Vec<Decimal>]) {
        if !self.convergence {
            return;
        }
        let w = self.weight_vector();
        let returns = self.effective_returns(expected_returns).to_vec();
        self.expected_return = Some(match self.method {
            MethodKind::RiskParity => Decimal::ZERO,
            _ => vec_dot(&w, &returns),
        });
        self.expected_volatility = Some(portfolio_std(&w, covariance));
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compute a fully invested, long-only allocation under per-asset caps.
///
/// Solver failures are reported in the result (`convergence = false`) rather
/// than as errors; malformed input is a configuration error.
pub fn optimize(input: &OptimizationInput) -> EngineResult<ComputationOutput<AllocationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let n = input.symbols.len();
    validate_input(input, n)?;
    let upper = input.bounds.upper_bounds(&input.symbols)?;
    let kind = input.method.kind();
    let cov = &input.covariance_matrix;

    let mut adjusted_returns: Option<Vec<Decimal>> = None;
    if let OptimizationMethod::ViewAdjusted(params) = &input.method {
        let post = view_adjusted::posterior_returns(
            &input.symbols,
            &input.expected_returns,
            cov,
            params,
        )?;
        debug!(views = post.view_count, "computed posterior returns");
        adjusted_returns = Some(post.posterior);
    }
    let returns: &[Decimal] = adjusted_returns.as_deref().unwrap_or(&input.expected_returns);

    let target = match (kind, input.target_return) {
        (MethodKind::MinimumVariance | MethodKind::RiskParity, Some(t)) => {
            warnings.push(format!(
                "Target return {} ignored by {}; it does not optimize for return",
                t, kind
            ));
            None
        }
        (_, t) => t,
    };
    // A return target replaces the return term of the objective.
    let risk_tolerance = match (kind, target) {
        (MethodKind::MeanVariance | MethodKind::ViewAdjusted, None) => input.risk_tolerance,
        _ => Decimal::ZERO,
    };

    let variance_objective = VarianceObjective {
        covariance: cov,
        expected_returns: returns,
        risk_tolerance,
    };
    let parity_objective = RiskParityObjective { covariance: cov };
    let (objective, optimality): (&dyn Objective, Optimality) = match kind {
        MethodKind::RiskParity => (&parity_objective, Optimality::Local),
        _ => (&variance_objective, Optimality::Global),
    };

    let set = FeasibleSet::new(
        upper,
        target.map(|t| ReturnTarget {
            returns: returns.to_vec(),
            target: t,
        }),
    );
    let outcome = solver::solve(objective, &set, &input.solver);
    let converged = outcome.status == SolverStatus::Converged;

    if converged {
        debug!(method = %kind, iterations = outcome.iterations, "optimizer converged");
    } else {
        warn!(
            method = %kind,
            status = ?outcome.status,
            message = %outcome.message,
            "optimizer did not converge"
        );
        warnings.push(format!("Optimizer did not converge: {}", outcome.message));
    }

    let mut result = AllocationResult {
        method: kind,
        convergence: converged,
        status: outcome.status,
        solver_message: outcome.message,
        iterations: outcome.iterations,
        optimality,
        weights: Vec::new(),
        expected_return: None,
        expected_volatility: None,
        adjusted_returns,
    };
    if converged {
        result.weights = input
            .symbols
            .iter()
            .zip(outcome.weights.iter())
            .map(|(s, w)| AssetWeight {
                symbol: s.clone(),
                weight: *w,
            })
            .collect();
        result.refresh_statistics(&input.expected_returns, cov);
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Projected gradient descent over the capped simplex",
        &serde_json::json!({
            "method": kind.to_string(),
            "n_assets": n,
            "risk_tolerance": risk_tolerance.to_string(),
            "target_return": target.map(|t| t.to_string()),
            "max_iterations": input.solver.max_iterations,
            "tolerance": input.solver.tolerance.to_string(),
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_input(input: &OptimizationInput, n: usize) -> EngineResult<()> {
    if n < 2 {
        return Err(EngineError::configuration(
            "symbols",
            format!("At least 2 assets required, got {}", n),
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
    if input.risk_tolerance < Decimal::ZERO {
        return Err(EngineError::configuration(
            "risk_tolerance",
            format!("Must not be negative, got {}", input.risk_tolerance),
        ));
    }
    if input.solver.max_iterations == 0 || input.solver.tolerance <= Decimal::ZERO {
        return Err(EngineError::configuration(
            "solver",
            "max_iterations and tolerance must be positive",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
