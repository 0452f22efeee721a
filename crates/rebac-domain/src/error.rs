//! Domain error types for authorization evaluation.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the evaluation core.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Error validating an authorization model.
    #[error("model validation error: {message}")]
    ModelValidation { message: String },

    /// Invalid user format in a request or tuple.
    #[error("invalid user format: {value}")]
    InvalidUserFormat { value: String },

    /// Invalid object format in a request or tuple.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid relation format in a request.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },

    /// Type not defined in the authorization model.
    #[error("type not found: {type_name}")]
    TypeUndefined { type_name: String },

    /// Relation not defined on a type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationUndefined { type_name: String, relation: String },

    /// Authorization model not found for a store.
    #[error("authorization model '{model_id}' not found for store '{store_id}'")]
    AuthorizationModelNotFound { store_id: String, model_id: String },

    /// No authorization model has been written to the store.
    #[error("no authorization model found for store '{store_id}'")]
    LatestAuthorizationModelNotFound { store_id: String },

    /// The resolution depth counter reached zero.
    #[error("resolution depth exceeded")]
    ResolutionDepthExceeded,

    /// ListUsers cannot enumerate a relation defined with this rewrite.
    #[error("cannot enumerate relation '{relation}': {reason}")]
    NotEnumerable { relation: String, reason: String },

    /// The surrounding cancellation scope was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Wrapped reader failure. The core does not retry these.
    #[error("storage operation failed: {0}")]
    Storage(#[from] StorageError),

    /// Invariant violation; indicates a bug and carries location context.
    #[error("internal error at {location}: {message}")]
    Internal { location: &'static str, message: String },
}

impl DomainError {
    pub(crate) fn internal(location: &'static str, message: impl Into<String>) -> Self {
        DomainError::Internal {
            location,
            message: message.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert() {
        let err: DomainError = StorageError::Transient {
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(matches!(err, DomainError::Storage(_)));
    }

    #[test]
    fn internal_errors_carry_location() {
        let err = DomainError::internal("graph::check", "unreachable rewrite variant");
        assert!(err.to_string().contains("graph::check"));
    }
}
