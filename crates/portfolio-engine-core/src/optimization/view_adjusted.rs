use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::math::{
    equal_weights, mat_inverse, mat_multiply, mat_scale, mat_transpose, mat_vec_multiply,
};
use crate::EngineResult;

pub const DEFAULT_TAU: Decimal = dec!(0.05);
pub const DEFAULT_RISK_AVERSION: Decimal = dec!(2.5);
pub const DEFAULT_VIEW_CONFIDENCE: Decimal = dec!(0.5);

/// Smallest view variance; a fully confident view would otherwise make the
/// view system singular.
const OMEGA_FLOOR: Decimal = dec!(0.0000000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An investor view on returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum View {
    /// "Asset A will return X."
    Absolute {
        symbol: String,
        expected_return: Decimal,
    },
    /// "Asset A will outperform asset B by X."
    Relative {
        long: String,
        short: String,
        expected_return: Decimal,
    },
}

/// Parameters of the view-adjusted (Black-Litterman) method. Unset fields
/// fall back to engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewAdjustedParams {
    /// Uncertainty scale on the equilibrium prior.
    pub tau: Option<Decimal>,
    /// Market risk aversion used to back out the prior.
    pub risk_aversion: Option<Decimal>,
    /// Reference weights for the prior; equal weights when absent.
    pub market_weights: Option<Vec<Decimal>>,
    /// Explicit views. When empty, each asset's historical return is used as
    /// an absolute view.
    pub views: Vec<View>,
    /// Confidence per view in (0, 1]; empty means the default for all.
    pub view_confidences: Vec<Decimal>,
    /// Confidence given to implicit historical views.
    pub default_confidence: Option<Decimal>,
}

/// Prior and posterior expected returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posterior {
    /// Implied equilibrium returns: pi = delta * Sigma * w_mkt.
    pub prior: Vec<Decimal>,
    pub posterior: Vec<Decimal>,
    pub view_count: usize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Blend the equilibrium prior with views:
///
/// mu = pi + tau*Sigma*P' * (P*tau*Sigma*P' + Omega)^-1 * (Q - P*pi)
///
/// Omega is diagonal with Omega_kk = (1/c_k - 1) * (P*tau*Sigma*P')_kk.
pub fn posterior_returns(
    symbols: &[String],
    historical_returns: &[Decimal],
    covariance: &[Vec<Decimal>],
    params: &ViewAdjustedParams,
) -> EngineResult<Posterior> {
    let n = symbols.len();
    let tau = params.tau.unwrap_or(DEFAULT_TAU);
    let delta = params.risk_aversion.unwrap_or(DEFAULT_RISK_AVERSION);
    let default_confidence = params.default_confidence.unwrap_or(DEFAULT_VIEW_CONFIDENCE);
    validate_params(params, n, tau, delta, default_confidence)?;

    let w_mkt = params
        .market_weights
        .clone()
        .unwrap_or_else(|| equal_weights(n));

    // --- Prior ---
    let sigma_w = mat_vec_multiply(covariance, &w_mkt);
    let pi: Vec<Decimal> = sigma_w.iter().map(|v| delta * *v).collect();

    // --- Views ---
    let views: Vec<View> = if params.views.is_empty() {
        symbols
            .iter()
            .zip(historical_returns.iter())
            .map(|(s, r)| View::Absolute {
                symbol: s.clone(),
                expected_return: *r,
            })
            .collect()
    } else {
        params.views.clone()
    };
    let confidences: Vec<Decimal> = if params.view_confidences.is_empty() {
        vec![default_confidence; views.len()]
    } else {
        params.view_confidences.clone()
    };
    let k = views.len();
    let (p_mat, q_vec) = build_pick_matrix_and_q(&views, symbols)?;

    // --- Posterior ---
    let tau_sigma = mat_scale(covariance, tau);
    let pt = mat_transpose(&p_mat);
    let tau_sigma_pt = mat_multiply(&tau_sigma, &pt);
    let view_cov = mat_multiply(&p_mat, &tau_sigma_pt);

    let mut system = view_cov.clone();
    for i in 0..k {
        let scale = Decimal::ONE / confidences[i] - Decimal::ONE;
        system[i][i] += (scale * view_cov[i][i]).max(OMEGA_FLOOR);
    }
    let system_inv = mat_inverse(&system)?;

    let p_pi = mat_vec_multiply(&p_mat, &pi);
    let surprise: Vec<Decimal> = q_vec.iter().zip(p_pi.iter()).map(|(q, r)| *q - *r).collect();
    let weighted = mat_vec_multiply(&system_inv, &surprise);
    let adjustment = mat_vec_multiply(&tau_sigma_pt, &weighted);

    let posterior: Vec<Decimal> = pi
        .iter()
        .zip(adjustment.iter())
        .map(|(p, a)| *p + *a)
        .collect();

    Ok(Posterior {
        prior: pi,
        posterior,
        view_count: k,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_params(
    params: &ViewAdjustedParams,
    n: usize,
    tau: Decimal,
    delta: Decimal,
    default_confidence: Decimal,
) -> EngineResult<()> {
    if tau <= Decimal::ZERO {
        return Err(EngineError::configuration(
            "tau",
            format!("Must be positive, got {}", tau),
        ));
    }
    if delta <= Decimal::ZERO {
        return Err(EngineError::configuration(
            "risk_aversion",
            format!("Must be positive, got {}", delta),
        ));
    }
    if default_confidence <= Decimal::ZERO || default_confidence > Decimal::ONE {
        return Err(EngineError::configuration(
            "default_confidence",
            format!("Confidence must be in (0, 1], got {}", default_confidence),
        ));
    }
    if let Some(w) = &params.market_weights {
        if w.len() != n {
            return Err(EngineError::configuration(
                "market_weights",
                format!("Expected {} weights but got {}", n, w.len()),
            ));
        }
        if w.iter().any(|x| *x < Decimal::ZERO) {
            return Err(EngineError::configuration(
                "market_weights",
                "Weights must not be negative",
            ));
        }
        let total: Decimal = w.iter().sum();
        if (total - Decimal::ONE).abs() > dec!(0.000001) {
            return Err(EngineError::configuration(
                "market_weights",
                format!("Weights must sum to 1, got {}", total),
            ));
        }
    }
    if !params.view_confidences.is_empty() && params.view_confidences.len() != params.views.len()
    {
        return Err(EngineError::configuration(
            "view_confidences",
            format!(
                "Number of views ({}) must match number of confidences ({})",
                params.views.len(),
                params.view_confidences.len()
            ),
        ));
    }
    for (i, conf) in params.view_confidences.iter().enumerate() {
        if *conf <= Decimal::ZERO || *conf > Decimal::ONE {
            return Err(EngineError::configuration(
                format!("view_confidences[{}]", i),
                format!("Confidence must be in (0, 1], got {}", conf),
            ));
        }
    }
    Ok(())
}

fn position(symbols: &[String], symbol: &str, row: usize) -> EngineResult<usize> {
    symbols.iter().position(|s| s == symbol).ok_or_else(|| {
        EngineError::configuration(
            format!("views[{}]", row),
            format!("Unknown symbol {}", symbol),
        )
    })
}

/// Build the K x N pick matrix P and K-vector Q from views.
fn build_pick_matrix_and_q(
    views: &[View],
    symbols: &[String],
) -> EngineResult<(Vec<Vec<Decimal>>, Vec<Decimal>)> {
    let n = symbols.len();
    let mut p = vec![vec![Decimal::ZERO; n]; views.len()];
    let mut q = vec![Decimal::ZERO; views.len()];

    for (row, view) in views.iter().enumerate() {
        match view {
            View::Absolute {
                symbol,
                expected_return,
            } => {
                p[row][position(symbols, symbol, row)?] = Decimal::ONE;
                q[row] = *expected_return;
            }
            View::Relative {
                long,
                short,
                expected_return,
            } => {
                let l = position(symbols, long, row)?;
                let s = position(symbols, short, row)?;
                if l == s {
                    return Err(EngineError::configuration(
                        format!("views[{}]", row),
                        "Relative view must reference two different assets",
                    ));
                }
                p[row][l] = Decimal::ONE;
                p[row][s] = -Decimal::ONE;
                q[row] = *expected_return;
            }
        }
    }

    Ok((p, q))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
