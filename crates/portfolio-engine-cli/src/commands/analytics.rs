use clap::Args;
use serde_json::Value;

use portfolio_engine_core::constraints::{apply_constraints, ConstraintInput};
use portfolio_engine_core::estimation::{estimate, EstimationInput};
use portfolio_engine_core::metrics::{compute_metrics, MetricsInput};
use portfolio_engine_core::optimization::{optimize, OptimizationInput};
use portfolio_engine_core::rebalancing::{generate_rebalancing, RebalanceInput};

use crate::input;

/// Arguments shared by the single-stage commands
#[derive(Args)]
pub struct StageArgs {
    /// Path to a JSON or YAML input file (stdin when omitted)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_estimate(args: StageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: EstimationInput = input::load(&args.input)?;
    let result = estimate(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_allocate(args: StageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: OptimizationInput = input::load(&args.input)?;
    let result = optimize(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_constrain(args: StageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: ConstraintInput = input::load(&args.input)?;
    let result = apply_constraints(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_metrics(args: StageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: MetricsInput = input::load(&args.input)?;
    let result = compute_metrics(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_rebalance(args: StageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: RebalanceInput = input::load(&args.input)?;
    let result = generate_rebalancing(&input_data)?;
    Ok(serde_json::to_value(result)?)
}
