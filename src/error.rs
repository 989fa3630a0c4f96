//! Error taxonomy (spec §7). Mirrors the `SimulationError` hierarchy of
//! `exceptions.py` (ParameterError/DistributionError/FinancialCalculationError/
//! ConvergenceError/ValidationError) as a single closed enum, since spec.md's
//! own taxonomy table does not separate "parameter" from "validation" errors.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Parameter { message: String, details: Option<Value> },

    #[error("{message}")]
    Distribution { message: String, details: Option<Value> },

    #[error("{message}")]
    Financial { message: String, details: Option<Value> },

    #[error("{message}")]
    Simulation { message: String, details: Option<Value> },

    #[error("cancelled after {completed_iterations} iterations")]
    Cancelled { completed_iterations: usize },

    #[error("{message}")]
    Convergence { message: String, details: Option<Value> },

    #[error("{message}")]
    Authorization { message: String },
}

impl CoreError {
    pub fn parameter(message: impl Into<String>) -> Self {
        CoreError::Parameter { message: message.into(), details: None }
    }

    pub fn parameter_with(message: impl Into<String>, details: Value) -> Self {
        CoreError::Parameter { message: message.into(), details: Some(details) }
    }

    pub fn distribution(message: impl Into<String>) -> Self {
        CoreError::Distribution { message: message.into(), details: None }
    }

    pub fn distribution_with(message: impl Into<String>, details: Value) -> Self {
        CoreError::Distribution { message: message.into(), details: Some(details) }
    }

    pub fn financial(message: impl Into<String>) -> Self {
        CoreError::Financial { message: message.into(), details: None }
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        CoreError::Simulation { message: message.into(), details: None }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        CoreError::Authorization { message: message.into() }
    }

    /// Structured payload a caller can render alongside `message`, the Rust
    /// analogue of `SimulationError.to_dict()['details']`.
    pub fn details(&self) -> Option<&Value> {
        match self {
            CoreError::Parameter { details, .. }
            | CoreError::Distribution { details, .. }
            | CoreError::Financial { details, .. }
            | CoreError::Simulation { details, .. }
            | CoreError::Convergence { details, .. } => details.as_ref(),
            CoreError::Cancelled { .. } | CoreError::Authorization { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
