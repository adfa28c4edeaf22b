use super::config::ConfigError;
use super::ids::{RestraintId, ScoreStateId};
use crate::core::error::{ErrorKind, ModelError};
use crate::core::models::ids::ParticleIndex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model error: {source}")]
    Model {
        #[from]
        source: ModelError,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Score state {0:?} is not part of this model")]
    ScoreStateNotFound(ScoreStateId),

    #[error("Restraint {0:?} is not part of this model")]
    RestraintNotFound(RestraintId),

    #[error("Dependency cycle among score states: {}", states.join(" -> "))]
    DependencyCycle { states: Vec<String> },

    #[error("Score state '{state}' depends on particle {particle:?}, which has been removed")]
    StaleDependency {
        state: String,
        particle: ParticleIndex,
    },

    #[error("Non-finite derivative {value} for '{key}' on particle {particle}")]
    InvalidDerivative {
        particle: String,
        key: &'static str,
        value: f64,
    },

    #[error("Invalid value in {operation}: {message}")]
    InvalidValue {
        operation: &'static str,
        message: String,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Model { source } => source.kind(),
            EngineError::ScoreStateNotFound(_) | EngineError::RestraintNotFound(_) => {
                ErrorKind::OutOfRange
            }
            EngineError::StaleDependency { .. } => ErrorKind::Usage,
            EngineError::Config { .. }
            | EngineError::DependencyCycle { .. }
            | EngineError::InvalidDerivative { .. }
            | EngineError::InvalidValue { .. } => ErrorKind::Value,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        EngineError::InvalidValue {
            operation,
            message: message.into(),
        }
    }
}
