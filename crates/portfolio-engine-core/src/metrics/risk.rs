use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::error::EngineError;
use crate::math::mat_vec_multiply;
use crate::optimization::risk_parity::risk_contributions;
use crate::EngineResult;

/// One asset's share of portfolio risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    pub symbol: String,
    pub weight: Decimal,
    /// w_i (Sigma w)_i / sigma_p; sums to portfolio volatility.
    pub contribution: Decimal,
    /// Fraction of portfolio variance.
    pub percentage: Decimal,
}

/// Gaussian tail figures at one confidence level, as positive loss fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParametricTail {
    pub value_at_risk: Decimal,
    pub expected_shortfall: Decimal,
}

/// VaR = -z(1-c) sigma and CVaR = sigma phi(z) / (1-c) for a zero-mean
/// normal return.
pub fn parametric_tail(volatility: Decimal, confidence: Decimal) -> EngineResult<ParametricTail> {
    let c = confidence
        .to_f64()
        .ok_or_else(|| EngineError::configuration("confidence_level", "not representable"))?;
    if !(c > 0.0 && c < 1.0) {
        return Err(EngineError::configuration(
            "confidence_level",
            format!("must be in (0, 1), got {}", confidence),
        ));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| EngineError::Estimation(format!("standard normal unavailable: {}", e)))?;
    let tail = 1.0 - c;
    let z = normal.inverse_cdf(tail);
    let density = normal.pdf(z);

    let to_decimal = |x: f64| {
        Decimal::from_f64(x)
            .ok_or_else(|| EngineError::Estimation(format!("non-finite normal quantile {}", x)))
    };
    let z_dec = to_decimal(z)?;
    let shortfall_factor = to_decimal(density / tail)?;

    Ok(ParametricTail {
        value_at_risk: -z_dec * volatility,
        expected_shortfall: shortfall_factor * volatility,
    })
}

/// Closed-form drawdown stand-in: multiplier x volatility. Not derived from
/// any return path.
pub fn max_drawdown_proxy(volatility: Decimal, multiplier: Decimal) -> Decimal {
    multiplier * volatility
}

pub fn contributions(
    symbols: &[String],
    weights: &[Decimal],
    covariance: &[Vec<Decimal>],
    volatility: Decimal,
) -> Vec<RiskContribution> {
    let sigma_w = mat_vec_multiply(covariance, weights);
    let shares = risk_contributions(weights, covariance);
    symbols
        .iter()
        .enumerate()
        .map(|(i, s)| RiskContribution {
            symbol: s.clone(),
            weight: weights[i],
            contribution: if volatility.is_zero() {
                Decimal::ZERO
            } else {
                weights[i] * sigma_w[i] / volatility
            },
            percentage: shares[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_var_95_is_1645_sigma() {
        let tail = parametric_tail(dec!(0.2), dec!(0.95)).unwrap();
        // 1.644854 * 0.2
        assert!((tail.value_at_risk - dec!(0.3289707)).abs() < dec!(0.00001));
        assert!(tail.value_at_risk > Decimal::ZERO);
    }

    #[test]
    fn test_expected_shortfall_exceeds_var() {
        let tail = parametric_tail(dec!(0.15), dec!(0.99)).unwrap();
        // phi(2.326) / 0.01 = 2.665
        assert!((tail.expected_shortfall - dec!(0.39979)).abs() < dec!(0.0001));
        assert!(tail.expected_shortfall > tail.value_at_risk);
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        assert!(parametric_tail(dec!(0.2), Decimal::ONE).is_err());
        assert!(parametric_tail(dec!(0.2), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_contributions_sum_to_volatility() {
        let cov = vec![
            vec![dec!(0.04), dec!(0.01)],
            vec![dec!(0.01), dec!(0.09)],
        ];
        let w = vec![dec!(0.6), dec!(0.4)];
        let vol = crate::math::portfolio_std(&w, &cov);
        let items = contributions(&["AAA".into(), "BBB".into()], &w, &cov, vol);
        let total: Decimal = items.iter().map(|c| c.contribution).sum();
        assert!((total - vol).abs() < dec!(0.0000001));
        let pct: Decimal = items.iter().map(|c| c.percentage).sum();
        assert!((pct - Decimal::ONE).abs() < dec!(0.0000001));
    }

    #[test]
    fn test_drawdown_proxy() {
        assert_eq!(max_drawdown_proxy(dec!(0.2), dec!(2.5)), dec!(0.5));
    }
}
