use chrono::NaiveDate;
use portfolio_engine_core::estimation::{estimate, EstimationInput};
use portfolio_engine_core::math::portfolio_variance;
use portfolio_engine_core::metrics::{compute_metrics, MetricsInput};
use portfolio_engine_core::optimization::risk_parity::risk_contributions;
use portfolio_engine_core::optimization::{
    optimize, OptimizationInput, OptimizationMethod, SolverStatus, WeightBounds,
};
use portfolio_engine_core::rebalancing::{generate_rebalancing, Direction, RebalanceInput};
use portfolio_engine_core::{
    AssetSeries, EngineError, Holding, PortfolioSnapshot, PriceObservation, SolverConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

const EPS: Decimal = dec!(0.000001);

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn three_asset_covariance() -> Vec<Vec<Decimal>> {
    vec![
        vec![dec!(0.04), dec!(0.006), dec!(0.004)],
        vec![dec!(0.006), dec!(0.09), dec!(0.018)],
        vec![dec!(0.004), dec!(0.018), dec!(0.0225)],
    ]
}

fn allocation_input(
    method: OptimizationMethod,
    names: &[&str],
    expected_returns: Vec<Decimal>,
    covariance: Vec<Vec<Decimal>>,
    cap: Decimal,
) -> OptimizationInput {
    OptimizationInput {
        method,
        symbols: symbols(names),
        expected_returns,
        covariance_matrix: covariance,
        risk_tolerance: Decimal::ZERO,
        target_return: None,
        bounds: WeightBounds::uniform(cap),
        solver: SolverConfig::default(),
    }
}

fn daily_series(symbol: &str, start_day: i64, closes: &[Decimal]) -> AssetSeries {
    let start = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    AssetSeries::new(
        symbol,
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceObservation {
                date: start + chrono::Duration::days(start_day + i as i64),
                close: *c,
            })
            .collect(),
    )
}

// ===========================================================================
// Acceptance scenarios
// ===========================================================================

#[test]
fn test_scenario_a_uncorrelated_minimum_variance_split() {
    let input = allocation_input(
        OptimizationMethod::MinimumVariance,
        &["LOW", "HIGH"],
        vec![dec!(0.10), dec!(0.10)],
        vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.09)]],
        Decimal::ONE,
    );
    let result = optimize(&input).unwrap().result;

    assert!(result.convergence);
    // Inverse variance: (1/0.04) / (1/0.04 + 1/0.09) = 9/13
    let low = result.weight_of("LOW").unwrap();
    let high = result.weight_of("HIGH").unwrap();
    assert!((low - dec!(0.6923077)).abs() < dec!(0.0001), "LOW = {}", low);
    assert!((high - dec!(0.3076923)).abs() < dec!(0.0001), "HIGH = {}", high);
}

#[test]
fn test_scenario_b_unreachable_target_is_not_fabricated() {
    let mut input = allocation_input(
        OptimizationMethod::MeanVariance,
        &["A", "B", "C"],
        vec![dec!(0.08), dec!(0.10), dec!(0.12)],
        three_asset_covariance(),
        dec!(0.4),
    );
    input.target_return = Some(dec!(0.15));
    let result = optimize(&input).unwrap().result;

    assert!(!result.convergence);
    assert_eq!(result.status, SolverStatus::Infeasible);
    assert!(result.weights.is_empty());
    assert!(result.expected_return.is_none());
}

#[test]
fn test_scenario_c_full_switch_produces_two_trades() {
    let mut snapshot = PortfolioSnapshot::default();
    snapshot.holdings.insert(
        "X".into(),
        Holding {
            quantity: dec!(10000),
            last_price: dec!(100),
        },
    );
    let mut target = BTreeMap::new();
    target.insert("X".to_string(), dec!(0.5));
    target.insert("Y".to_string(), dec!(0.5));

    let plan = generate_rebalancing(&RebalanceInput {
        target_weights: target,
        snapshot,
        materiality_threshold: Some(dec!(0.05)),
        high_priority_threshold: None,
    })
    .unwrap()
    .result;

    assert_eq!(plan.total_value, dec!(1_000_000));
    assert_eq!(plan.actions.len(), 2);
    let sell = plan.actions.iter().find(|a| a.symbol == "X").unwrap();
    let buy = plan.actions.iter().find(|a| a.symbol == "Y").unwrap();
    assert_eq!(sell.direction, Direction::Sell);
    assert_eq!(sell.amount, dec!(500_000));
    assert_eq!(buy.direction, Direction::Buy);
    assert_eq!(buy.amount, dec!(500_000));
}

#[test]
fn test_scenario_d_single_overlapping_date_is_estimation_error() {
    let a = daily_series("AAA", 0, &[dec!(100), dec!(101), dec!(102)]);
    // Starts on AAA's last day.
    let b = daily_series("BBB", 2, &[dec!(50), dec!(51), dec!(52)]);

    let err = estimate(&EstimationInput {
        series: vec![a, b],
        lookback_days: 365,
        periods_per_year: None,
    })
    .unwrap_err();

    match err {
        EngineError::Estimation(msg) => {
            assert!(msg.contains("Insufficient overlapping observations"), "{}", msg)
        }
        other => panic!("expected estimation error, got {:?}", other),
    }
}

// ===========================================================================
// Allocation properties
// ===========================================================================

#[test]
fn test_allocations_sum_to_one_within_caps() {
    let methods = vec![
        OptimizationMethod::MeanVariance,
        OptimizationMethod::MinimumVariance,
        OptimizationMethod::RiskParity,
        "view_adjusted".parse().unwrap(),
    ];
    for method in methods {
        let mut input = allocation_input(
            method.clone(),
            &["A", "B", "C"],
            vec![dec!(0.08), dec!(0.10), dec!(0.12)],
            three_asset_covariance(),
            dec!(0.45),
        );
        input.risk_tolerance = dec!(0.5);
        let result = optimize(&input).unwrap().result;

        assert!(result.convergence, "{:?} did not converge", method);
        let total: Decimal = result.weight_vector().iter().sum();
        assert!((total - Decimal::ONE).abs() < EPS, "{:?} sums to {}", method, total);
        for w in result.weight_vector() {
            assert!(w >= Decimal::ZERO && w <= dec!(0.45) + EPS, "{:?}: {}", method, w);
        }
    }
}

#[test]
fn test_minimum_variance_beats_random_portfolios() {
    let cov = three_asset_covariance();
    let input = allocation_input(
        OptimizationMethod::MinimumVariance,
        &["A", "B", "C"],
        vec![dec!(0.08), dec!(0.10), dec!(0.12)],
        cov.clone(),
        Decimal::ONE,
    );
    let result = optimize(&input).unwrap().result;
    let best = portfolio_variance(&result.weight_vector(), &cov);

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..1000 {
        let raw: Vec<Decimal> = (0..3)
            .map(|_| Decimal::from_f64_retain(rng.gen_range(0.0..1.0)).unwrap_or(Decimal::ONE))
            .collect();
        let sum: Decimal = raw.iter().sum();
        if sum.is_zero() {
            continue;
        }
        let w: Vec<Decimal> = raw.iter().map(|x| *x / sum).collect();
        let variance = portfolio_variance(&w, &cov);
        assert!(
            best <= variance + dec!(0.0000000001),
            "optimal {} above random {} at {:?}",
            best,
            variance,
            w
        );
    }
}

#[test]
fn test_risk_parity_equalizes_contributions() {
    let cov = three_asset_covariance();
    let input = allocation_input(
        OptimizationMethod::RiskParity,
        &["A", "B", "C"],
        vec![dec!(0.08), dec!(0.10), dec!(0.12)],
        cov.clone(),
        Decimal::ONE,
    );
    let result = optimize(&input).unwrap().result;
    assert!(result.convergence);

    let third = Decimal::ONE / dec!(3);
    for rc in risk_contributions(&result.weight_vector(), &cov) {
        assert!((rc - third).abs() < dec!(0.02), "contribution {}", rc);
    }
    // The most volatile asset gets the smallest weight.
    assert!(result.weight_of("B").unwrap() < result.weight_of("A").unwrap());
}

#[test]
fn test_risk_parity_equalizes_contributions_across_ten_assets() {
    let names = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];
    let vols: Vec<Decimal> = (0..10)
        .map(|i| dec!(0.10) + dec!(0.02) * Decimal::from(i))
        .collect();
    let cov: Vec<Vec<Decimal>> = (0..10)
        .map(|i| {
            (0..10)
                .map(|j| {
                    let rho = if i == j { Decimal::ONE } else { dec!(0.3) };
                    rho * vols[i] * vols[j]
                })
                .collect()
        })
        .collect();
    let input = allocation_input(
        OptimizationMethod::RiskParity,
        &names,
        vec![dec!(0.08); 10],
        cov.clone(),
        Decimal::ONE,
    );
    let result = optimize(&input).unwrap().result;
    assert!(result.convergence);

    let weights = result.weight_vector();
    let total: Decimal = weights.iter().sum();
    assert!((total - Decimal::ONE).abs() < EPS);
    let tenth = dec!(0.1);
    for rc in risk_contributions(&weights, &cov) {
        assert!((rc - tenth).abs() < dec!(0.02), "contribution {}", rc);
    }
    // Weights fall as volatility rises.
    for pair in weights.windows(2) {
        assert!(pair[1] < pair[0]);
    }
}

// ===========================================================================
// Rebalancing properties
// ===========================================================================

fn two_asset_snapshot() -> PortfolioSnapshot {
    let mut snapshot = PortfolioSnapshot::default();
    snapshot.holdings.insert(
        "AAA".into(),
        Holding {
            quantity: dec!(300),
            last_price: dec!(10),
        },
    );
    snapshot.holdings.insert(
        "BBB".into(),
        Holding {
            quantity: dec!(70),
            last_price: dec!(100),
        },
    );
    snapshot
}

#[test]
fn test_rebalancing_to_current_weights_is_empty() {
    let snapshot = two_asset_snapshot();
    let plan = generate_rebalancing(&RebalanceInput {
        target_weights: snapshot.current_weights(),
        snapshot,
        materiality_threshold: None,
        high_priority_threshold: None,
    })
    .unwrap()
    .result;
    assert!(plan.actions.is_empty());
    assert_eq!(plan.turnover, Decimal::ZERO);
}

#[test]
fn test_rebalancing_is_idempotent() {
    let mut target = BTreeMap::new();
    target.insert("AAA".to_string(), dec!(0.6));
    target.insert("BBB".to_string(), dec!(0.4));
    let input = RebalanceInput {
        target_weights: target,
        snapshot: two_asset_snapshot(),
        materiality_threshold: None,
        high_priority_threshold: None,
    };

    let first = generate_rebalancing(&input).unwrap().result;
    let second = generate_rebalancing(&input).unwrap().result;
    assert_eq!(first.actions, second.actions);
    assert_eq!(first.actions.len(), 2);
}

// ===========================================================================
// Metrics properties
// ===========================================================================

#[test]
fn test_diversification_ratio_at_least_one_when_imperfectly_correlated() {
    let input = MetricsInput {
        symbols: symbols(&["A", "B", "C"]),
        weights: vec![dec!(0.5), dec!(0.2), dec!(0.3)],
        expected_returns: vec![dec!(0.08), dec!(0.10), dec!(0.12)],
        covariance_matrix: three_asset_covariance(),
        risk_free_rate: dec!(0.02),
        confidence_level: dec!(0.95),
        periodic_returns: None,
        periods_per_year: 252,
        drawdown_multiplier: dec!(2.5),
        portfolio_value: Some(dec!(1_000_000)),
    };
    let metrics = compute_metrics(&input).unwrap().result;

    let dr = metrics.diversification_ratio.unwrap();
    assert!(dr >= Decimal::ONE, "diversification ratio {}", dr);
    assert!(metrics.value_at_risk > Decimal::ZERO);
    assert!(metrics.expected_shortfall > metrics.value_at_risk);
    let total: Decimal = metrics.risk_contributions.iter().map(|c| c.percentage).sum();
    assert!((total - Decimal::ONE).abs() < dec!(0.0001));
}
