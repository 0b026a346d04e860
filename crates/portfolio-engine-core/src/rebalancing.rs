//! Rebalancing recommendations.
//!
//! Compares target weights with the weights implied by a portfolio snapshot
//! and emits buy/sell actions for every symbol whose drift is material.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::debug;

use crate::error::EngineError;
use crate::types::{with_metadata, ComputationOutput, Money, PortfolioSnapshot, Weight};
use crate::EngineResult;

pub const DEFAULT_MATERIALITY_THRESHOLD: Decimal = dec!(0.05);
pub const DEFAULT_HIGH_PRIORITY_THRESHOLD: Decimal = dec!(0.10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

/// Declaration order is sort order: high before medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

/// One recommended trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingAction {
    pub symbol: String,
    pub direction: Direction,
    pub current_weight: Weight,
    pub target_weight: Weight,
    /// target - current
    pub delta: Decimal,
    /// |delta| x total value
    pub amount: Money,
    /// amount / last price, when a positive price is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_quantity: Option<Decimal>,
    pub priority: Priority,
}

/// Input to rebalancing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceInput {
    pub target_weights: BTreeMap<String, Weight>,
    pub snapshot: PortfolioSnapshot,
    /// Minimum |delta| to act on (default 0.05).
    #[serde(default)]
    pub materiality_threshold: Option<Decimal>,
    /// |delta| above which an action is high priority (default 0.10).
    #[serde(default)]
    pub high_priority_threshold: Option<Decimal>,
}

/// Actions plus portfolio-level figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingPlan {
    pub actions: Vec<RebalancingAction>,
    pub total_value: Money,
    /// sum(|delta|) / 2 over the emitted actions.
    pub turnover: Decimal,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Generate the ordered list of actions moving the snapshot to the target.
///
/// Order: high priority first, then larger |delta|, then symbol.
pub fn generate_rebalancing(
    input: &RebalanceInput,
) -> EngineResult<ComputationOutput<RebalancingPlan>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let materiality = input
        .materiality_threshold
        .unwrap_or(DEFAULT_MATERIALITY_THRESHOLD);
    let high_priority = input
        .high_priority_threshold
        .unwrap_or(DEFAULT_HIGH_PRIORITY_THRESHOLD);
    validate_input(input, materiality, high_priority)?;

    let total_value = input.snapshot.total_value();
    if total_value.is_zero() {
        warnings.push("Portfolio has no market value; amounts are zero".into());
    }
    let current = input.snapshot.current_weights();

    let target_sum: Decimal = input.target_weights.values().sum();
    if (target_sum - Decimal::ONE).abs() > dec!(0.000001) && !input.target_weights.is_empty() {
        warnings.push(format!("Target weights sum to {}, not 1", target_sum));
    }

    let universe: BTreeSet<&String> = input
        .target_weights
        .keys()
        .chain(input.snapshot.holdings.keys())
        .collect();

    let mut actions: Vec<RebalancingAction> = Vec::new();
    for symbol in universe {
        let target = input
            .target_weights
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let cur = current.get(symbol).copied().unwrap_or(Decimal::ZERO);
        if target.is_zero() && cur.is_zero() {
            continue;
        }
        let delta = target - cur;
        if delta.abs() <= materiality {
            continue;
        }

        let amount = delta.abs() * total_value;
        let estimated_quantity = input
            .snapshot
            .holdings
            .get(symbol)
            .map(|h| h.last_price)
            .filter(|p| *p > Decimal::ZERO)
            .map(|p| amount / p);

        actions.push(RebalancingAction {
            symbol: symbol.clone(),
            direction: if delta > Decimal::ZERO {
                Direction::Buy
            } else {
                Direction::Sell
            },
            current_weight: cur,
            target_weight: target,
            delta,
            amount,
            estimated_quantity,
            priority: if delta.abs() > high_priority {
                Priority::High
            } else {
                Priority::Medium
            },
        });
    }

    actions.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.delta.abs().cmp(&a.delta.abs()))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let turnover = actions.iter().map(|a| a.delta.abs()).sum::<Decimal>() / dec!(2);
    debug!(actions = actions.len(), %turnover, "generated rebalancing plan");

    let output = RebalancingPlan {
        actions,
        total_value,
        turnover,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Target vs current weight drift with materiality threshold",
        &serde_json::json!({
            "materiality_threshold": materiality.to_string(),
            "high_priority_threshold": high_priority.to_string(),
            "total_value": total_value.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_input(
    input: &RebalanceInput,
    materiality: Decimal,
    high_priority: Decimal,
) -> EngineResult<()> {
    if materiality < Decimal::ZERO {
        return Err(EngineError::configuration(
            "materiality_threshold",
            "must not be negative",
        ));
    }
    if high_priority < Decimal::ZERO {
        return Err(EngineError::configuration(
            "high_priority_threshold",
            "must not be negative",
        ));
    }
    for (symbol, w) in &input.target_weights {
        if *w < Decimal::ZERO || *w > Decimal::ONE {
            return Err(EngineError::configuration(
                "target_weights",
                format!("{} weight {} outside [0, 1]", symbol, w),
            ));
        }
    }
    for (symbol, h) in &input.snapshot.holdings {
        if h.quantity < Decimal::ZERO {
            return Err(EngineError::collaborator(
                "position_store",
                format!("{} has negative quantity {}", symbol, h.quantity),
            ));
        }
        if h.last_price <= Decimal::ZERO {
            return Err(EngineError::collaborator(
                "position_store",
                format!("{} has non-positive price {}", symbol, h.last_price),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
