//! Post-optimization enforcement of per-asset and sector caps.
//!
//! The optimizer already honours per-asset caps; this stage re-imposes caps
//! that were tightened after the fact (compliance overrides) and the sector
//! limits the optimizer knows nothing about. Excess weight is redistributed
//! proportionally among assets with headroom until no cap is breached.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use crate::error::EngineError;
use crate::optimization::{AllocationResult, WeightBounds};
use crate::types::{with_metadata, ComputationOutput};
use crate::EngineResult;

const EPSILON: Decimal = dec!(0.000000000001);
const MAX_PASSES: usize = 200;
const SUM_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Sector limits with the symbol-to-sector mapping they apply through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorCaps {
    /// symbol -> sector
    pub sectors: BTreeMap<String, String>,
    /// sector -> maximum total weight
    pub caps: BTreeMap<String, Decimal>,
}

/// Input to constraint post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintInput {
    pub allocation: AllocationResult,
    #[serde(default)]
    pub asset_caps: Option<WeightBounds>,
    #[serde(default)]
    pub sector_caps: Option<SectorCaps>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Enforce caps on a converged allocation.
///
/// When weights change, expected return and volatility are cleared; callers
/// holding the estimate recompute them with
/// [`AllocationResult::refresh_statistics`].
pub fn apply_constraints(
    input: &ConstraintInput,
) -> EngineResult<ComputationOutput<AllocationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let allocation = &input.allocation;
    if !allocation.convergence {
        return Err(EngineError::Convergence {
            method: allocation.method.to_string(),
            iterations: allocation.iterations,
            message: format!(
                "refusing to constrain a non-converged allocation: {}",
                allocation.solver_message
            ),
        });
    }

    let symbols: Vec<String> = allocation.weights.iter().map(|w| w.symbol.clone()).collect();
    let n = symbols.len();
    let original = allocation.weight_vector();
    validate_weights(&symbols, &original)?;
    let mut w = original.clone();

    let caps = match &input.asset_caps {
        Some(bounds) => bounds.upper_bounds(&symbols)?,
        None => vec![Decimal::ONE; n],
    };
    let cap_total: Decimal = caps.iter().sum();
    if cap_total < Decimal::ONE - EPSILON {
        return Err(EngineError::configuration(
            "asset_caps",
            format!(
                "caps sum to {}, cannot hold a fully invested portfolio",
                cap_total
            ),
        ));
    }

    let groups = sector_groups(&symbols, input.sector_caps.as_ref())?;
    check_sector_capacity(&groups, &caps, n)?;

    for _ in 0..MAX_PASSES {
        let mut changed = false;

        // --- Per-asset caps ---
        let mut excess = Decimal::ZERO;
        for i in 0..n {
            if w[i] > caps[i] + EPSILON {
                warnings.push(format!(
                    "{} clamped from {} to {}",
                    symbols[i],
                    w[i].round_dp(6),
                    caps[i]
                ));
                excess += w[i] - caps[i];
                w[i] = caps[i];
            }
        }
        if excess > EPSILON {
            changed = true;
            let saturated = saturated_members(&groups, &w, n);
            let room: Vec<Decimal> = (0..n)
                .map(|i| {
                    if saturated[i] {
                        Decimal::ZERO
                    } else {
                        caps[i] - w[i]
                    }
                })
                .collect();
            let leftover = spread(&mut w, excess, room);
            if leftover > EPSILON {
                return Err(unsatisfiable(leftover));
            }
        }

        // --- Sector caps ---
        for group in &groups {
            let total: Decimal = group.members.iter().map(|&i| w[i]).sum();
            if total <= group.cap + EPSILON || total.is_zero() {
                continue;
            }
            changed = true;
            warnings.push(format!(
                "Sector {} scaled from {} to {}",
                group.sector,
                total.round_dp(6),
                group.cap
            ));
            let scale = group.cap / total;
            for &i in &group.members {
                w[i] *= scale;
            }
            let excess = total - group.cap;
            let saturated = saturated_members(&groups, &w, n);
            let room: Vec<Decimal> = (0..n)
                .map(|i| {
                    if saturated[i] || group.members.contains(&i) {
                        Decimal::ZERO
                    } else {
                        (caps[i] - w[i]).max(Decimal::ZERO)
                    }
                })
                .collect();
            let leftover = spread(&mut w, excess, room);
            if leftover > EPSILON {
                return Err(unsatisfiable(leftover));
            }
        }

        if !changed {
            break;
        }
    }

    // Floor and renormalize.
    for x in w.iter_mut() {
        if *x < Decimal::ZERO {
            *x = Decimal::ZERO;
        }
    }
    let total: Decimal = w.iter().sum();
    if total.is_zero() {
        return Err(unsatisfiable(Decimal::ONE));
    }
    if total > Decimal::ONE {
        for x in w.iter_mut() {
            *x /= total;
        }
    } else if total < Decimal::ONE {
        // Shortfall goes only where caps leave headroom.
        let room: Vec<Decimal> = (0..n).map(|i| (caps[i] - w[i]).max(Decimal::ZERO)).collect();
        spread(&mut w, Decimal::ONE - total, room);
    }

    let mut result = allocation.clone();
    let moved = w
        .iter()
        .zip(original.iter())
        .any(|(a, b)| (*a - *b).abs() > EPSILON);
    for (aw, new) in result.weights.iter_mut().zip(w.iter()) {
        aw.weight = *new;
    }
    if moved {
        result.expected_return = None;
        result.expected_volatility = None;
        warnings.push("Weights changed; expected return and volatility need refreshing".into());
    }
    debug!(adjusted = moved, "applied allocation constraints");

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Cap clamping with proportional redistribution",
        &serde_json::json!({
            "n_assets": n,
            "asset_caps": input.asset_caps.is_some(),
            "sector_caps": groups.len(),
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Caps are only meaningful against a fully invested, long-only allocation.
fn validate_weights(symbols: &[String], weights: &[Decimal]) -> EngineResult<()> {
    if let Some(i) = weights.iter().position(|w| *w < Decimal::ZERO) {
        return Err(EngineError::configuration(
            "allocation",
            format!("weight for {} is negative: {}", symbols[i], weights[i]),
        ));
    }
    let total: Decimal = weights.iter().sum();
    if (total - Decimal::ONE).abs() > SUM_TOLERANCE {
        return Err(EngineError::configuration(
            "allocation",
            format!("weights sum to {}, expected 1", total.round_dp(8)),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct SectorGroup {
    sector: String,
    cap: Decimal,
    members: Vec<usize>,
}

fn sector_groups(
    symbols: &[String],
    sector_caps: Option<&SectorCaps>,
) -> EngineResult<Vec<SectorGroup>> {
    let sc = match sector_caps {
        Some(sc) => sc,
        None => return Ok(Vec::new()),
    };
    let mut groups = Vec::new();
    for (sector, cap) in &sc.caps {
        if *cap <= Decimal::ZERO || *cap > Decimal::ONE {
            return Err(EngineError::configuration(
                "sector_caps",
                format!("cap for sector {} must be in (0, 1], got {}", sector, cap),
            ));
        }
        let members: Vec<usize> = symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| sc.sectors.get(*s) == Some(sector))
            .map(|(i, _)| i)
            .collect();
        if !members.is_empty() {
            groups.push(SectorGroup {
                sector: sector.clone(),
                cap: *cap,
                members,
            });
        }
    }
    Ok(groups)
}

/// Fails when asset and sector caps together cannot hold a full portfolio.
fn check_sector_capacity(
    groups: &[SectorGroup],
    caps: &[Decimal],
    n: usize,
) -> EngineResult<()> {
    if groups.is_empty() {
        return Ok(());
    }
    let mut grouped = vec![false; n];
    let mut capacity = Decimal::ZERO;
    for g in groups {
        let member_caps: Decimal = g.members.iter().map(|&i| caps[i]).sum();
        capacity += member_caps.min(g.cap);
        for &i in &g.members {
            grouped[i] = true;
        }
    }
    capacity += (0..n).filter(|&i| !grouped[i]).map(|i| caps[i]).sum::<Decimal>();
    if capacity < Decimal::ONE - EPSILON {
        return Err(EngineError::configuration(
            "sector_caps",
            format!(
                "asset and sector caps admit at most {} total weight",
                capacity.round_dp(6)
            ),
        ));
    }
    Ok(())
}

fn saturated_members(groups: &[SectorGroup], w: &[Decimal], n: usize) -> Vec<bool> {
    let mut saturated = vec![false; n];
    for g in groups {
        let total: Decimal = g.members.iter().map(|&i| w[i]).sum();
        if total >= g.cap - EPSILON {
            for &i in &g.members {
                saturated[i] = true;
            }
        }
    }
    saturated
}

/// Hand `excess` to assets with room, proportionally to their weight (or
/// equally when none of them hold any). Returns what could not be placed.
fn spread(w: &mut [Decimal], mut excess: Decimal, mut room: Vec<Decimal>) -> Decimal {
    for _ in 0..w.len() {
        let receivers: Vec<usize> = (0..w.len()).filter(|&i| room[i] > EPSILON).collect();
        if receivers.is_empty() || excess <= EPSILON {
            break;
        }
        let base: Decimal = receivers.iter().map(|&i| w[i]).sum();
        let count = Decimal::from(receivers.len() as i64);
        let mut placed = Decimal::ZERO;
        for &i in &receivers {
            let share = if base.is_zero() {
                excess / count
            } else {
                excess * w[i] / base
            };
            let give = share.min(room[i]);
            w[i] += give;
            room[i] -= give;
            placed += give;
        }
        excess -= placed;
    }
    excess.max(Decimal::ZERO)
}

fn unsatisfiable(leftover: Decimal) -> EngineError {
    EngineError::configuration(
        "constraints",
        format!(
            "caps leave {} of the portfolio unallocated",
            leftover.round_dp(6)
        ),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::optimization::{MethodKind, Optimality, SolverStatus};
    use crate::types::AssetWeight;

    fn allocation(weights: &[(&str, Decimal)]) -> AllocationResult {
        AllocationResult {
            method: MethodKind::MeanVariance,
            convergence: true,
            status: SolverStatus::Converged,
            solver_message: "converged".into(),
            iterations: 10,
            optimality: Optimality::Global,
            weights: weights
                .iter()
                .map(|(s, w)| AssetWeight {
                    symbol: s.to_string(),
                    weight: *w,
                })
                .collect(),
            expected_return: Some(dec!(0.1)),
            expected_volatility: Some(dec!(0.2)),
            adjusted_returns: None,
        }
    }

    fn assert_close(a: Decimal, b: Decimal) {
        assert!((a - b).abs() < dec!(0.0000001), "{} != {}", a, b);
    }

    #[test]
    fn test_no_caps_is_noop() {
        let input = ConstraintInput {
            allocation: allocation(&[("AAA", dec!(0.6)), ("BBB", dec!(0.4))]),
            asset_caps: None,
            sector_caps: None,
        };
        let out = apply_constraints(&input).unwrap();
        assert_eq!(out.result.weight_vector(), vec![dec!(0.6), dec!(0.4)]);
        assert_eq!(out.result.expected_return, Some(dec!(0.1)));
    }

    #[test]
    fn test_asset_cap_redistributes_proportionally() {
        let input = ConstraintInput {
            allocation: allocation(&[
                ("AAA", dec!(0.6)),
                ("BBB", dec!(0.3)),
                ("CCC", dec!(0.1)),
            ]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.4))),
            sector_caps: None,
        };
        let out = apply_constraints(&input).unwrap();
        let w = out.result.weight_vector();
        assert_close(w[0], dec!(0.4));
        assert_close(w[1], dec!(0.4));
        assert_close(w[2], dec!(0.2));
        assert!(out.result.expected_return.is_none());
        assert!(out.warnings.iter().any(|m| m.contains("AAA clamped")));
    }

    #[test]
    fn test_sector_cap_scales_and_redistributes() {
        let mut sectors = SectorCaps::default();
        sectors.sectors.insert("AAA".into(), "tech".into());
        sectors.sectors.insert("BBB".into(), "tech".into());
        sectors.sectors.insert("CCC".into(), "energy".into());
        sectors.caps.insert("tech".into(), dec!(0.5));

        let input = ConstraintInput {
            allocation: allocation(&[
                ("AAA", dec!(0.3)),
                ("BBB", dec!(0.3)),
                ("CCC", dec!(0.2)),
                ("DDD", dec!(0.2)),
            ]),
            asset_caps: None,
            sector_caps: Some(sectors),
        };
        let out = apply_constraints(&input).unwrap();
        let w = out.result.weight_vector();
        for x in &w {
            assert_close(*x, dec!(0.25));
        }
        let total: Decimal = w.iter().sum();
        assert_close(total, Decimal::ONE);
    }

    #[test]
    fn test_sector_and_asset_caps_together() {
        let mut sectors = SectorCaps::default();
        sectors.sectors.insert("AAA".into(), "tech".into());
        sectors.sectors.insert("BBB".into(), "tech".into());
        sectors.caps.insert("tech".into(), dec!(0.4));

        let input = ConstraintInput {
            allocation: allocation(&[
                ("AAA", dec!(0.5)),
                ("BBB", dec!(0.3)),
                ("CCC", dec!(0.1)),
                ("DDD", dec!(0.1)),
            ]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.35))),
            sector_caps: Some(sectors),
        };
        let out = apply_constraints(&input).unwrap();
        let w = out.result.weight_vector();
        assert!(w[0] + w[1] <= dec!(0.4) + dec!(0.0000001));
        for x in &w {
            assert!(*x <= dec!(0.35) + dec!(0.0000001));
            assert!(*x >= Decimal::ZERO);
        }
        assert_close(w.iter().sum(), Decimal::ONE);
    }

    #[test]
    fn test_caps_too_tight_rejected() {
        let input = ConstraintInput {
            allocation: allocation(&[
                ("AAA", dec!(0.5)),
                ("BBB", dec!(0.3)),
                ("CCC", dec!(0.2)),
            ]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.2))),
            sector_caps: None,
        };
        let err = apply_constraints(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_unnormalized_allocation_rejected() {
        let input = ConstraintInput {
            allocation: allocation(&[("AAA", dec!(0.45)), ("BBB", dec!(0.05))]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.6))),
            sector_caps: None,
        };
        let err = apply_constraints(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.to_string().contains("sum to 0.5"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let input = ConstraintInput {
            allocation: allocation(&[("AAA", dec!(1.2)), ("BBB", dec!(-0.2))]),
            asset_caps: None,
            sector_caps: None,
        };
        let err = apply_constraints(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.to_string().contains("BBB"));
    }

    #[test]
    fn test_near_unit_sum_within_tolerance_accepted() {
        let input = ConstraintInput {
            allocation: allocation(&[("AAA", dec!(0.7000004)), ("BBB", dec!(0.3))]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.6))),
            sector_caps: None,
        };
        let out = apply_constraints(&input).unwrap();
        for x in out.result.weight_vector() {
            assert!(x <= dec!(0.6) + dec!(0.0000001));
        }
        assert_close(out.result.weight_vector().iter().sum(), Decimal::ONE);
    }

    #[test]
    fn test_short_sum_fill_keeps_clamped_weight_at_cap() {
        let input = ConstraintInput {
            allocation: allocation(&[("AAA", dec!(0.7)), ("BBB", dec!(0.2999996))]),
            asset_caps: Some(WeightBounds::uniform(dec!(0.6))),
            sector_caps: None,
        };
        let w = apply_constraints(&input).unwrap().result.weight_vector();
        assert_eq!(w[0], dec!(0.6));
        assert_close(w[1], dec!(0.4));
    }

    #[test]
    fn test_non_converged_rejected() {
        let mut alloc = allocation(&[]);
        alloc.convergence = false;
        alloc.status = SolverStatus::MaxIterations;
        let input = ConstraintInput {
            allocation: alloc,
            asset_caps: None,
            sector_caps: None,
        };
        let err = apply_constraints(&input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConvergenceError);
    }
}
