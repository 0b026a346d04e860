use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::solver::Objective;
use crate::math::{mat_vec_multiply, vec_dot};

/// Fraction of portfolio variance contributed by each asset:
/// RC_i = w_i * (Sigma w)_i / (w' Sigma w). All zero when variance is zero.
pub fn risk_contributions(w: &[Decimal], covariance: &[Vec<Decimal>]) -> Vec<Decimal> {
    let sigma_w = mat_vec_multiply(covariance, w);
    let variance = vec_dot(w, &sigma_w);
    if variance <= Decimal::ZERO {
        return vec![Decimal::ZERO; w.len()];
    }
    w.iter()
        .zip(sigma_w.iter())
        .map(|(wi, si)| *wi * *si / variance)
        .collect()
}

/// Squared deviation of risk contributions from an equal share:
///
/// f(w) = sum_i (RC_i - 1/n)^2
///
/// Not convex; the solver reaches a local optimum.
#[derive(Debug, Clone)]
pub struct RiskParityObjective<'a> {
    pub covariance: &'a [Vec<Decimal>],
}

impl RiskParityObjective<'_> {
    fn target(&self, n: usize) -> Decimal {
        Decimal::ONE / Decimal::from(n as i64)
    }
}

impl Objective for RiskParityObjective<'_> {
    fn value(&self, w: &[Decimal]) -> Decimal {
        let target = self.target(w.len());
        let rc = risk_contributions(w, self.covariance);
        if rc.iter().all(|r| r.is_zero()) {
            return Decimal::ZERO;
        }
        rc.iter().map(|r| (*r - target) * (*r - target)).sum()
    }

    /// dRC_i/dw_j = (delta_ij s_i + w_i Sigma_ij) / V - 2 w_i s_i s_j / V^2
    /// with s = Sigma w and V = w' s.
    fn gradient(&self, w: &[Decimal]) -> Vec<Decimal> {
        let n = w.len();
        let sigma_w = mat_vec_multiply(self.covariance, w);
        let variance = vec_dot(w, &sigma_w);
        if variance <= Decimal::ZERO {
            return vec![Decimal::ZERO; n];
        }
        let target = self.target(n);
        let rc: Vec<Decimal> = w
            .iter()
            .zip(sigma_w.iter())
            .map(|(wi, si)| *wi * *si / variance)
            .collect();
        let err: Vec<Decimal> = rc.iter().map(|r| *r - target).collect();
        let err_rc: Decimal = vec_dot(&err, &rc);
        let err_w: Vec<Decimal> = err.iter().zip(w.iter()).map(|(e, wi)| *e * *wi).collect();
        let sigma_err_w = mat_vec_multiply(self.covariance, &err_w);

        (0..n)
            .map(|j| {
                dec!(2) / variance
                    * (err[j] * sigma_w[j] + sigma_err_w[j] - dec!(2) * sigma_w[j] * err_rc)
            })
            .collect()
    }
}
