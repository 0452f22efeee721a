//! Storage error types.

use thiserror::Error;

/// Errors surfaced by tuple readers and stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store not found.
    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    /// Store already exists.
    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    /// Model not found.
    #[error("model not found: {model_id}")]
    ModelNotFound { model_id: String },

    /// Tuple to delete was not found.
    #[error("tuple not found: {tuple}")]
    TupleNotFound { tuple: String },

    /// Tuple to write already exists.
    #[error("duplicate tuple: {tuple}")]
    DuplicateTuple { tuple: String },

    /// Invalid filter specification.
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Invalid input.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Invalid continuation token.
    #[error("invalid continuation token: {token}")]
    InvalidContinuationToken { token: String },

    /// Transient backend failure; a decorator may race, the core never
    /// retries.
    #[error("transient storage failure: {reason}")]
    Transient { reason: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
