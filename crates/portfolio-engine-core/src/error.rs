use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Estimation error: {0}")]
    Estimation(String),

    #[error("Convergence failure: {method} did not converge after {iterations} iterations ({message})")]
    Convergence {
        method: String,
        iterations: u32,
        message: String,
    },

    #[error("Invalid configuration: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Collaborator error: {collaborator}: {reason}")]
    Collaborator {
        collaborator: String,
        reason: String,
    },
}

/// Stable error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    EstimationError,
    ConvergenceError,
    ConfigurationError,
    CollaboratorError,
}

/// Structured failure returned in place of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub success: bool,
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn collaborator(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Collaborator {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Estimation(_) => ErrorKind::EstimationError,
            EngineError::Convergence { .. } => ErrorKind::ConvergenceError,
            EngineError::Configuration { .. } => ErrorKind::ConfigurationError,
            EngineError::Collaborator { .. } => ErrorKind::CollaboratorError,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            success: false,
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
