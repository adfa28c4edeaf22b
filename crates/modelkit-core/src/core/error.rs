use super::keys::KeyKind;
use super::models::ids::{EdgeIndex, ParticleIndex};
use thiserror::Error;

/// Coarse classification of a failure, independent of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller violated an API contract (missing key, double add, bad cast).
    Usage,
    /// A particle index or edge slot does not address anything live.
    OutOfRange,
    /// Arguments that are semantically invalid regardless of build mode.
    Value,
    /// Library bookkeeping is inconsistent; a bug, not misuse.
    Internal,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Attribute {kind} '{key}' already exists on particle {particle}")]
    AttributeExists {
        particle: String,
        key: &'static str,
        kind: KeyKind,
    },

    #[error("Attribute {kind} '{key}' not found on particle {particle}")]
    AttributeNotFound {
        particle: String,
        key: &'static str,
        kind: KeyKind,
    },

    #[error("Derivatives of particle {particle} cannot be read during an evaluation pass")]
    DerivativesCheckedOut { particle: String },

    #[error("Particle {index:?} does not exist or has been removed")]
    ParticleNotFound { index: ParticleIndex },

    #[error("Particle {particle} is not a valid {decorator}: missing {missing}")]
    NotDecorated {
        particle: String,
        decorator: &'static str,
        missing: String,
    },

    #[error("Particle {particle} is already set up as {decorator}")]
    AlreadyDecorated {
        particle: String,
        decorator: &'static str,
    },

    #[error("Particle {particle} is not a node of graph '{graph}'")]
    NotGraphNode {
        particle: String,
        graph: &'static str,
    },

    #[error("Particle {particle} is already a node of graph '{graph}'")]
    AlreadyGraphNode {
        particle: String,
        graph: &'static str,
    },

    #[error("Edge {edge:?} does not exist in graph '{graph}'")]
    EdgeNotFound { edge: EdgeIndex, graph: &'static str },

    #[error(
        "Edge slot {slot} is out of range for particle {particle} ({count} edges in graph '{graph}')"
    )]
    EdgeSlotOutOfRange {
        particle: String,
        graph: &'static str,
        slot: usize,
        count: usize,
    },

    #[error("Endpoint {endpoint} is out of range; an edge has two endpoints")]
    EndpointOutOfRange { endpoint: usize },

    #[error("Invalid value in {operation}: {message}")]
    InvalidValue {
        operation: &'static str,
        message: String,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::AttributeExists { .. }
            | ModelError::AttributeNotFound { .. }
            | ModelError::DerivativesCheckedOut { .. }
            | ModelError::NotDecorated { .. }
            | ModelError::AlreadyDecorated { .. }
            | ModelError::NotGraphNode { .. }
            | ModelError::AlreadyGraphNode { .. }
            | ModelError::EdgeNotFound { .. } => ErrorKind::Usage,
            ModelError::ParticleNotFound { .. }
            | ModelError::EdgeSlotOutOfRange { .. }
            | ModelError::EndpointOutOfRange { .. } => ErrorKind::OutOfRange,
            ModelError::InvalidValue { .. } => ErrorKind::Value,
            ModelError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        ModelError::InvalidValue {
            operation,
            message: message.into(),
        }
    }
}

/// Formats a particle for error messages as `'name' (index)`.
pub(crate) fn describe(name: &str, index: ParticleIndex) -> String {
    format!("'{}' ({:?})", name, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_onto_error_kinds() {
        let usage = ModelError::AlreadyDecorated {
            particle: "'p' (1v1)".into(),
            decorator: "Xyz",
        };
        assert_eq!(usage.kind(), ErrorKind::Usage);
        assert_eq!(
            ModelError::EndpointOutOfRange { endpoint: 2 }.kind(),
            ErrorKind::OutOfRange
        );
        assert_eq!(ModelError::invalid("graph_connect", "self").kind(), ErrorKind::Value);
        assert_eq!(ModelError::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn messages_carry_operation_context() {
        let error = ModelError::AttributeNotFound {
            particle: "'atom' (3v1)".into(),
            key: "x",
            kind: KeyKind::Float,
        };
        assert_eq!(
            error.to_string(),
            "Attribute float 'x' not found on particle 'atom' (3v1)"
        );
    }
}
