//! Engine-wide tunables.
//!
//! Every field has a default so a partial file (or none at all) is valid.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Rate;
use crate::EngineResult;

/// Limits for the shared constrained solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: u32,
    /// Largest per-coordinate step accepted as converged.
    pub tolerance: Decimal,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: 10_000,
            tolerance: dec!(0.0000000001),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trading periods per year used to annualize daily statistics.
    pub periods_per_year: u32,
    /// Calendar days of history requested and retained.
    pub lookback_days: u32,
    /// Per-asset weight cap applied by every optimization method.
    pub default_asset_cap: Decimal,
    pub risk_free_rate: Rate,
    pub var_confidence: Decimal,
    /// Minimum |target - current| before an action is emitted.
    pub materiality_threshold: Decimal,
    /// |delta| above which an action is high priority.
    pub high_priority_threshold: Decimal,
    /// Max drawdown proxy = multiplier x volatility.
    pub drawdown_multiplier: Decimal,
    /// Black-Litterman prior uncertainty scale.
    pub view_tau: Decimal,
    /// Market risk aversion for the equilibrium prior.
    pub risk_aversion: Decimal,
    /// Confidence attached to implicit historical views.
    pub view_confidence: Decimal,
    pub solver: SolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            periods_per_year: 252,
            lookback_days: 365,
            default_asset_cap: dec!(0.4),
            risk_free_rate: dec!(0.02),
            var_confidence: dec!(0.95),
            materiality_threshold: dec!(0.05),
            high_priority_threshold: dec!(0.10),
            drawdown_multiplier: dec!(2.5),
            view_tau: dec!(0.05),
            risk_aversion: dec!(2.5),
            view_confidence: dec!(0.5),
            solver: SolverConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.periods_per_year == 0 {
            return Err(EngineError::configuration(
                "periods_per_year",
                "must be positive",
            ));
        }
        if self.lookback_days < 2 {
            return Err(EngineError::configuration(
                "lookback_days",
                "at least 2 days of history are required",
            ));
        }
        if self.default_asset_cap <= Decimal::ZERO || self.default_asset_cap > Decimal::ONE {
            return Err(EngineError::configuration(
                "default_asset_cap",
                format!("must be in (0, 1], got {}", self.default_asset_cap),
            ));
        }
        if self.var_confidence <= Decimal::ZERO || self.var_confidence >= Decimal::ONE {
            return Err(EngineError::configuration(
                "var_confidence",
                format!("must be in (0, 1), got {}", self.var_confidence),
            ));
        }
        if self.materiality_threshold < Decimal::ZERO {
            return Err(EngineError::configuration(
                "materiality_threshold",
                "must not be negative",
            ));
        }
        if self.high_priority_threshold < self.materiality_threshold {
            return Err(EngineError::configuration(
                "high_priority_threshold",
                "must be at least the materiality threshold",
            ));
        }
        if self.drawdown_multiplier <= Decimal::ZERO {
            return Err(EngineError::configuration(
                "drawdown_multiplier",
                "must be positive",
            ));
        }
        if self.view_tau <= Decimal::ZERO {
            return Err(EngineError::configuration("view_tau", "must be positive"));
        }
        if self.risk_aversion <= Decimal::ZERO {
            return Err(EngineError::configuration(
                "risk_aversion",
                "must be positive",
            ));
        }
        if self.view_confidence <= Decimal::ZERO || self.view_confidence > Decimal::ONE {
            return Err(EngineError::configuration(
                "view_confidence",
                "must be in (0, 1]",
            ));
        }
        if self.solver.max_iterations == 0 || self.solver.tolerance <= Decimal::ZERO {
            return Err(EngineError::configuration(
                "solver",
                "max_iterations and tolerance must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.periods_per_year, 252);
        assert_eq!(config.default_asset_cap, dec!(0.4));
        assert_eq!(config.materiality_threshold, dec!(0.05));
        assert_eq!(config.view_tau, dec!(0.05));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"risk_free_rate": "0.035", "solver": {"max_iterations": 50}}"#)
                .unwrap();
        assert_eq!(config.risk_free_rate, dec!(0.035));
        assert_eq!(config.solver.max_iterations, 50);
        assert_eq!(config.solver.tolerance, SolverConfig::default().tolerance);
        assert_eq!(config.lookback_days, 365);
    }

    #[test]
    fn test_invalid_cap_rejected() {
        let config = EngineConfig {
            default_asset_cap: dec!(1.5),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
