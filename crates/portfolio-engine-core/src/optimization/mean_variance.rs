use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::solver::Objective;
use crate::math::{mat_vec_multiply, vec_dot};

/// Quadratic mean-variance objective
///
/// f(w) = w' * Sigma * w - q * mu' * w
///
/// With `q = 0` this is the minimum-variance objective.
#[derive(Debug, Clone)]
pub struct VarianceObjective<'a> {
    pub covariance: &'a [Vec<Decimal>],
    pub expected_returns: &'a [Decimal],
    /// Weight `q` on expected return; zero ignores returns entirely.
    pub risk_tolerance: Decimal,
}

impl<'a> VarianceObjective<'a> {
    pub fn minimum_variance(
        covariance: &'a [Vec<Decimal>],
        expected_returns: &'a [Decimal],
    ) -> Self {
        VarianceObjective {
            covariance,
            expected_returns,
            risk_tolerance: Decimal::ZERO,
        }
    }
}

impl Objective for VarianceObjective<'_> {
    fn value(&self, w: &[Decimal]) -> Decimal {
        let sigma_w = mat_vec_multiply(self.covariance, w);
        let variance = vec_dot(w, &sigma_w);
        if self.risk_tolerance.is_zero() {
            variance
        } else {
            variance - self.risk_tolerance * vec_dot(self.expected_returns, w)
        }
    }

    fn gradient(&self, w: &[Decimal]) -> Vec<Decimal> {
        let sigma_w = mat_vec_multiply(self.covariance, w);
        sigma_w
            .iter()
            .zip(self.expected_returns.iter())
            .map(|(s, mu)| dec!(2) * *s - self.risk_tolerance * *mu)
            .collect()
    }
}
