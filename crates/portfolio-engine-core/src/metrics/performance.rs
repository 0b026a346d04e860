use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::math::{sqrt_decimal, vec_dot};

/// What the Sortino denominator was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortinoBasis {
    /// Downside deviation of the historical portfolio return path.
    DownsideDeviation,
    /// No return path available; total volatility stands in (equals Sharpe).
    VolatilityProxy,
}

/// (R - rf) / sigma; `None` when sigma is zero.
pub fn sharpe_ratio(
    portfolio_return: Decimal,
    risk_free_rate: Decimal,
    volatility: Decimal,
) -> Option<Decimal> {
    if volatility.is_zero() {
        None
    } else {
        Some((portfolio_return - risk_free_rate) / volatility)
    }
}

/// Per-period portfolio returns: r_t = sum_i w_i r_{t,i}.
pub fn portfolio_path(weights: &[Decimal], periodic_returns: &[Vec<Decimal>]) -> Vec<Decimal> {
    periodic_returns
        .iter()
        .map(|row| vec_dot(weights, row))
        .collect()
}

/// Annualized downside deviation of `path` below `annual_target`:
///
/// DD = sqrt( mean( min(r_t - target/ppy, 0)^2 ) ) * sqrt(ppy)
pub fn downside_deviation(
    path: &[Decimal],
    annual_target: Decimal,
    periods_per_year: u32,
) -> Decimal {
    if path.is_empty() || periods_per_year == 0 {
        return Decimal::ZERO;
    }
    let ppy = Decimal::from(periods_per_year);
    let per_period_target = annual_target / ppy;
    let sum_sq: Decimal = path
        .iter()
        .map(|r| {
            let shortfall = (*r - per_period_target).min(Decimal::ZERO);
            shortfall * shortfall
        })
        .sum();
    let mean_sq = sum_sq / Decimal::from(path.len() as i64);
    sqrt_decimal(mean_sq) * sqrt_decimal(ppy)
}

/// Sortino ratio and the basis it was computed on.
pub fn sortino_ratio(
    portfolio_return: Decimal,
    risk_free_rate: Decimal,
    volatility: Decimal,
    path: Option<&[Decimal]>,
    periods_per_year: u32,
) -> (Option<Decimal>, SortinoBasis) {
    match path {
        Some(p) if !p.is_empty() => {
            let dd = downside_deviation(p, risk_free_rate, periods_per_year);
            let ratio = if dd.is_zero() {
                None
            } else {
                Some((portfolio_return - risk_free_rate) / dd)
            };
            (ratio, SortinoBasis::DownsideDeviation)
        }
        _ => (
            sharpe_ratio(portfolio_return, risk_free_rate, volatility),
            SortinoBasis::VolatilityProxy,
        ),
    }
}

/// Weighted average asset volatility over portfolio volatility.
pub fn diversification_ratio(
    weights: &[Decimal],
    covariance: &[Vec<Decimal>],
    volatility: Decimal,
) -> Option<Decimal> {
    if volatility.is_zero() {
        return None;
    }
    let weighted: Decimal = weights
        .iter()
        .enumerate()
        .map(|(i, w)| *w * sqrt_decimal(covariance[i][i]))
        .sum();
    Some(weighted / volatility)
}

/// Sum of squared weights.
pub fn herfindahl_index(weights: &[Decimal]) -> Decimal {
    weights.iter().map(|w| *w * *w).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sharpe_undefined_at_zero_volatility() {
        assert_eq!(sharpe_ratio(dec!(0.1), dec!(0.02), Decimal::ZERO), None);
        assert_eq!(sharpe_ratio(dec!(0.1), dec!(0.02), dec!(0.2)), Some(dec!(0.4)));
    }

    #[test]
    fn test_downside_deviation_ignores_upside() {
        // target 0, ppy 1: shortfalls -0.1 and -0.3 over 4 periods
        let path = vec![dec!(0.2), dec!(-0.1), dec!(0.05), dec!(-0.3)];
        let dd = downside_deviation(&path, Decimal::ZERO, 1);
        // sqrt((0.01 + 0.09) / 4) = sqrt(0.025)
        assert!((dd - dec!(0.158113883)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_sortino_without_path_is_sharpe() {
        let (ratio, basis) = sortino_ratio(dec!(0.1), dec!(0.02), dec!(0.2), None, 252);
        assert_eq!(basis, SortinoBasis::VolatilityProxy);
        assert_eq!(ratio, Some(dec!(0.4)));
    }

    #[test]
    fn test_sortino_all_gains_is_undefined() {
        let path = vec![dec!(0.01), dec!(0.02)];
        let (ratio, basis) = sortino_ratio(dec!(0.1), Decimal::ZERO, dec!(0.2), Some(&path), 252);
        assert_eq!(basis, SortinoBasis::DownsideDeviation);
        assert_eq!(ratio, None);
    }

    #[test]
    fn test_herfindahl_bounds() {
        assert_eq!(herfindahl_index(&[dec!(0.25); 4]), dec!(0.25));
        assert_eq!(herfindahl_index(&[Decimal::ONE, Decimal::ZERO]), Decimal::ONE);
    }
}
