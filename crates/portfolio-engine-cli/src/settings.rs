use portfolio_engine_core::EngineConfig;
use std::path::Path;
use tracing::{debug, info};

/// Environment prefix for overrides, e.g. `PFE_RISK_FREE_RATE=0.03` or
/// `PFE_SOLVER__MAX_ITERATIONS=20000`.
pub const ENV_PREFIX: &str = "PFE";

/// Build the engine configuration: defaults, then the optional file (TOML,
/// YAML or JSON by extension), then environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut builder = config::Config::builder();
    if let Some(p) = path {
        if !p.is_file() {
            return Err(format!("Config file not found: {}", p.display()).into());
        }
        builder = builder.add_source(config::File::from(p));
        info!(path = %p.display(), "loading engine configuration file");
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let engine: EngineConfig = settings.try_deserialize()?;
    engine.validate()?;
    debug!(
        file = path.is_some(),
        lookback_days = engine.lookback_days,
        "engine configuration resolved"
    );
    Ok(engine)
}
