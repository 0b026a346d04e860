//! Shared constrained solver.
//!
//! Every allocation method minimizes a smooth objective over the same
//! feasible set:
//!
//! ```text
//! 0 <= w_i <= cap_i,   sum(w) = 1,   [ mu . w = target ]
//! ```
//!
//! The solve is projected gradient descent with Armijo backtracking. The
//! Euclidean projection onto the set is exact: for the capped simplex the
//! shift `lambda` in `clamp(v - lambda, 0, cap)` is found on the piecewise
//! linear mass curve, and the return hyperplane adds a second multiplier
//! `gamma` (on `mu`) found by bisection, since the projected return is
//! monotone in `gamma`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::math::{equal_weights, max_abs_diff, vec_dot};

const INITIAL_STEP: Decimal = Decimal::ONE;
const MAX_STEP: Decimal = dec!(10000);
const MAX_BACKTRACKS: usize = 60;
const GAMMA_BRACKET_EXPANSIONS: usize = 80;
const GAMMA_BISECTION_STEPS: usize = 200;
const RETURN_TOLERANCE: Decimal = dec!(0.000000000001);
const FEASIBILITY_TOLERANCE: Decimal = dec!(0.000000000001);

/// Smooth function of the weight vector.
pub trait Objective {
    fn value(&self, w: &[Decimal]) -> Decimal;
    fn gradient(&self, w: &[Decimal]) -> Vec<Decimal>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    Converged,
    MaxIterations,
    Infeasible,
}

/// Linear equality `returns . w = target`.
#[derive(Debug, Clone)]
pub struct ReturnTarget {
    pub returns: Vec<Decimal>,
    pub target: Decimal,
}

/// Box-constrained simplex, optionally cut by a return target.
#[derive(Debug, Clone)]
pub struct FeasibleSet {
    pub upper: Vec<Decimal>,
    pub return_target: Option<ReturnTarget>,
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub weights: Vec<Decimal>,
    pub status: SolverStatus,
    pub iterations: u32,
    pub objective: Decimal,
    pub message: String,
}

impl FeasibleSet {
    pub fn new(upper: Vec<Decimal>, return_target: Option<ReturnTarget>) -> Self {
        FeasibleSet {
            upper,
            return_target,
        }
    }

    /// Returns the reason the set is empty, if it is.
    pub fn infeasibility(&self) -> Option<String> {
        let cap_total: Decimal = self.upper.iter().sum();
        if cap_total < Decimal::ONE - FEASIBILITY_TOLERANCE {
            return Some(format!(
                "per-asset caps sum to {}, below a fully invested portfolio",
                cap_total.round_dp(6)
            ));
        }
        if let Some(rt) = &self.return_target {
            let (low, high) = achievable_return_range(&rt.returns, &self.upper);
            if rt.target > high + FEASIBILITY_TOLERANCE || rt.target < low - FEASIBILITY_TOLERANCE
            {
                return Some(format!(
                    "target return {} outside achievable range [{}, {}] under per-asset caps",
                    rt.target,
                    low.round_dp(6),
                    high.round_dp(6)
                ));
            }
        }
        None
    }

    /// Euclidean projection of `v` onto the set.
    pub fn project(&self, v: &[Decimal]) -> Vec<Decimal> {
        match &self.return_target {
            None => project_capped_simplex(v, &self.upper),
            Some(rt) => project_with_return(v, &self.upper, rt),
        }
    }
}

/// Lowest and highest `returns . w` over the capped simplex, by filling the
/// worst (resp. best) assets up to their caps first.
pub fn achievable_return_range(returns: &[Decimal], upper: &[Decimal]) -> (Decimal, Decimal) {
    let mut order: Vec<usize> = (0..returns.len()).collect();
    order.sort_by(|a, b| returns[*a].cmp(&returns[*b]));
    let fill = |idx: &mut dyn Iterator<Item = usize>| -> Decimal {
        let mut remaining = Decimal::ONE;
        let mut total = Decimal::ZERO;
        for i in idx {
            if remaining <= Decimal::ZERO {
                break;
            }
            let w = upper[i].min(remaining);
            total += w * returns[i];
            remaining -= w;
        }
        total
    };
    let low = fill(&mut order.iter().copied());
    let high = fill(&mut order.iter().rev().copied());
    (low, high)
}

fn clamped(v: Decimal, upper: Decimal) -> Decimal {
    v.max(Decimal::ZERO).min(upper)
}

fn mass(v: &[Decimal], upper: &[Decimal], lambda: Decimal) -> Decimal {
    v.iter()
        .zip(upper.iter())
        .map(|(vi, ui)| clamped(*vi - lambda, *ui))
        .sum()
}

/// Project onto `{0 <= w <= upper, sum(w) = 1}`.
///
/// The mass `h(lambda) = sum(clamp(v_i - lambda, 0, u_i))` is piecewise linear
/// and non-increasing with breakpoints at `v_i` and `v_i - u_i`; the crossing
/// `h = 1` is interpolated exactly on its segment.
pub fn project_capped_simplex(v: &[Decimal], upper: &[Decimal]) -> Vec<Decimal> {
    let mut points: Vec<Decimal> = v
        .iter()
        .zip(upper.iter())
        .flat_map(|(vi, ui)| [*vi, *vi - *ui])
        .collect();
    points.sort();
    points.dedup();

    let mut lambda = points.last().copied().unwrap_or(Decimal::ZERO);
    let mut prev: Option<(Decimal, Decimal)> = None;
    for p in &points {
        let h = mass(v, upper, *p);
        if h <= Decimal::ONE {
            lambda = match prev {
                Some((a, h_a)) if h_a != h => *p - (*p - a) * (Decimal::ONE - h) / (h_a - h),
                _ => *p,
            };
            break;
        }
        prev = Some((*p, h));
    }

    let mut w: Vec<Decimal> = v
        .iter()
        .zip(upper.iter())
        .map(|(vi, ui)| clamped(*vi - lambda, *ui))
        .collect();
    polish_sum(&mut w, upper);
    w
}

/// Spread rounding residue of the budget over coordinates strictly inside
/// their bounds.
fn polish_sum(w: &mut [Decimal], upper: &[Decimal]) {
    let residual = Decimal::ONE - w.iter().sum::<Decimal>();
    if residual.is_zero() {
        return;
    }
    let free: Vec<usize> = (0..w.len())
        .filter(|&i| w[i] > Decimal::ZERO && w[i] < upper[i])
        .collect();
    if free.is_empty() {
        return;
    }
    let share = residual / Decimal::from(free.len() as i64);
    for i in free {
        w[i] = clamped(w[i] + share, upper[i]);
    }
}

fn project_with_return(v: &[Decimal], upper: &[Decimal], rt: &ReturnTarget) -> Vec<Decimal> {
    let at = |gamma: Decimal| -> (Vec<Decimal>, Decimal) {
        let shifted: Vec<Decimal> = v
            .iter()
            .zip(rt.returns.iter())
            .map(|(vi, mi)| *vi - gamma * *mi)
            .collect();
        let w = project_capped_simplex(&shifted, upper);
        let r = vec_dot(&w, &rt.returns);
        (w, r)
    };

    let (w0, r0) = at(Decimal::ZERO);
    if (r0 - rt.target).abs() <= RETURN_TOLERANCE {
        return w0;
    }

    // Projected return is non-increasing in gamma.
    let (mut lo, mut hi) = if r0 < rt.target {
        (-Decimal::ONE, Decimal::ZERO)
    } else {
        (Decimal::ZERO, Decimal::ONE)
    };
    for _ in 0..GAMMA_BRACKET_EXPANSIONS {
        let (_, r_lo) = at(lo);
        let (_, r_hi) = at(hi);
        if r_lo >= rt.target && r_hi <= rt.target {
            break;
        }
        if r_lo < rt.target {
            lo *= dec!(2);
        }
        if r_hi > rt.target {
            hi *= dec!(2);
        }
    }

    let mut best = w0;
    let mut best_gap = (r0 - rt.target).abs();
    for _ in 0..GAMMA_BISECTION_STEPS {
        let mid = (lo + hi) / dec!(2);
        let (w, r) = at(mid);
        let gap = (r - rt.target).abs();
        if gap < best_gap {
            best_gap = gap;
            best = w;
        }
        if gap <= RETURN_TOLERANCE || hi - lo <= RETURN_TOLERANCE {
            break;
        }
        if r > rt.target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    best
}

/// Minimize `objective` over `set`, starting from equal weights.
pub fn solve(objective: &dyn Objective, set: &FeasibleSet, config: &SolverConfig) -> SolveOutcome {
    let n = set.upper.len();
    if let Some(reason) = set.infeasibility() {
        return SolveOutcome {
            weights: Vec::new(),
            status: SolverStatus::Infeasible,
            iterations: 0,
            objective: Decimal::ZERO,
            message: reason,
        };
    }

    let mut w = set.project(&equal_weights(n));
    let mut f = objective.value(&w);
    let mut step = INITIAL_STEP;

    for iteration in 1..=config.max_iterations {
        let grad = objective.gradient(&w);

        let mut accepted: Option<(Vec<Decimal>, Decimal)> = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<Decimal> = w
                .iter()
                .zip(grad.iter())
                .map(|(wi, gi)| *wi - step * *gi)
                .collect();
            let candidate = set.project(&trial);
            let d: Vec<Decimal> = candidate
                .iter()
                .zip(w.iter())
                .map(|(c, wi)| *c - *wi)
                .collect();
            let f_candidate = objective.value(&candidate);
            // Sufficient decrease for a projected step of length `step`.
            let bound = f + vec_dot(&grad, &d) + vec_dot(&d, &d) / (dec!(2) * step);
            if f_candidate <= bound + FEASIBILITY_TOLERANCE * FEASIBILITY_TOLERANCE {
                accepted = Some((candidate, f_candidate));
                break;
            }
            step /= dec!(2);
        }

        let (candidate, f_candidate) = match accepted {
            Some(c) => c,
            None => {
                return SolveOutcome {
                    weights: w,
                    status: SolverStatus::MaxIterations,
                    iterations: iteration,
                    objective: f,
                    message: "line search failed to find a descent step".into(),
                };
            }
        };

        let moved = max_abs_diff(&candidate, &w);
        w = candidate;
        f = f_candidate;
        if moved <= config.tolerance {
            return SolveOutcome {
                weights: w,
                status: SolverStatus::Converged,
                iterations: iteration,
                objective: f,
                message: format!("converged: step {} within tolerance", moved),
            };
        }
        step = (step * dec!(2)).min(MAX_STEP);
    }

    SolveOutcome {
        weights: w,
        status: SolverStatus::MaxIterations,
        iterations: config.max_iterations,
        objective: f,
        message: format!(
            "iteration limit {} reached before the step fell below {}",
            config.max_iterations, config.tolerance
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(w: &[Decimal]) -> Decimal {
        w.iter().sum()
    }

    struct Quadratic {
        center: Vec<Decimal>,
    }

    impl Objective for Quadratic {
        fn value(&self, w: &[Decimal]) -> Decimal {
            w.iter()
                .zip(self.center.iter())
                .map(|(a, b)| (*a - *b) * (*a - *b))
                .sum()
        }

        fn gradient(&self, w: &[Decimal]) -> Vec<Decimal> {
            w.iter()
                .zip(self.center.iter())
                .map(|(a, b)| dec!(2) * (*a - *b))
                .collect()
        }
    }

    #[test]
    fn test_projection_of_feasible_point_is_identity() {
        let v = vec![dec!(0.2), dec!(0.3), dec!(0.5)];
        let w = project_capped_simplex(&v, &[Decimal::ONE; 3]);
        assert_eq!(w, v);
    }

    #[test]
    fn test_projection_respects_caps() {
        let v = vec![dec!(2), dec!(0), dec!(0)];
        let w = project_capped_simplex(&v, &[dec!(0.4); 3]);
        assert_eq!(w[0], dec!(0.4));
        assert!((w[1] - dec!(0.3)).abs() < dec!(0.0000000001));
        assert!((w[2] - dec!(0.3)).abs() < dec!(0.0000000001));
        assert!((sum(&w) - Decimal::ONE).abs() < dec!(0.0000000001));
    }

    #[test]
    fn test_projection_shifts_uniformly() {
        // Shifting every coordinate by the same amount projects to the same point.
        let v = vec![dec!(1.2), dec!(1.3), dec!(1.5)];
        let w = project_capped_simplex(&v, &[Decimal::ONE; 3]);
        assert!((w[0] - dec!(0.2)).abs() < dec!(0.0000000001));
        assert!((w[2] - dec!(0.5)).abs() < dec!(0.0000000001));
    }

    #[test]
    fn test_projection_with_return_target() {
        let rt = ReturnTarget {
            returns: vec![dec!(0.05), dec!(0.10), dec!(0.15)],
            target: dec!(0.12),
        };
        let set = FeasibleSet::new(vec![Decimal::ONE; 3], Some(rt));
        let w = set.project(&equal_weights(3));
        let r = vec_dot(&w, &[dec!(0.05), dec!(0.10), dec!(0.15)]);
        assert!((r - dec!(0.12)).abs() < dec!(0.000000001));
        assert!((sum(&w) - Decimal::ONE).abs() < dec!(0.000000001));
        assert!(w.iter().all(|x| *x >= Decimal::ZERO));
    }

    #[test]
    fn test_achievable_range() {
        let (low, high) =
            achievable_return_range(&[dec!(0.08), dec!(0.10), dec!(0.12)], &[dec!(0.4); 3]);
        // high: 0.4*0.12 + 0.4*0.10 + 0.2*0.08
        assert_eq!(high, dec!(0.104));
        // low: 0.4*0.08 + 0.4*0.10 + 0.2*0.12
        assert_eq!(low, dec!(0.096));
    }

    #[test]
    fn test_caps_below_full_investment_are_infeasible() {
        let set = FeasibleSet::new(vec![dec!(0.4), dec!(0.4)], None);
        assert!(set.infeasibility().is_some());
        let outcome = solve(
            &Quadratic {
                center: vec![dec!(0.5), dec!(0.5)],
            },
            &set,
            &SolverConfig::default(),
        );
        assert_eq!(outcome.status, SolverStatus::Infeasible);
        assert!(outcome.weights.is_empty());
    }

    #[test]
    fn test_solve_quadratic_interior_minimum() {
        let set = FeasibleSet::new(vec![Decimal::ONE; 3], None);
        let objective = Quadratic {
            center: vec![dec!(0.6), dec!(0.3), dec!(0.1)],
        };
        let outcome = solve(&objective, &set, &SolverConfig::default());
        assert_eq!(outcome.status, SolverStatus::Converged);
        assert!((outcome.weights[0] - dec!(0.6)).abs() < dec!(0.000001));
        assert!((outcome.weights[1] - dec!(0.3)).abs() < dec!(0.000001));
        assert!((outcome.weights[2] - dec!(0.1)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_solve_stops_at_iteration_limit() {
        let set = FeasibleSet::new(vec![Decimal::ONE; 3], None);
        let objective = Quadratic {
            center: vec![dec!(0.9), dec!(0.05), dec!(0.05)],
        };
        let config = SolverConfig {
            max_iterations: 1,
            tolerance: dec!(0.0000000001),
        };
        let outcome = solve(&objective, &set, &config);
        assert_eq!(outcome.status, SolverStatus::MaxIterations);
    }
}
