pub mod config;
pub mod constraints;
pub mod error;
pub mod estimation;
pub mod math;
pub mod metrics;
pub mod optimization;
pub mod pipeline;
pub mod rebalancing;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

pub use config::{EngineConfig, SolverConfig};
pub use error::{EngineError, ErrorKind, ErrorReport};
pub use types::*;

/// Standard result type for all engine operations
pub type EngineResult<T> = Result<T, EngineError>;
