//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failure reported by the storage engine.
    #[error("backend error: {0}")]
    Backend(String),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key could not be decoded into its typed form.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The transaction already committed or aborted.
    #[error("transaction {0} is closed")]
    TransactionClosed(u64),

    /// Failure injected by a test backend.
    #[error("injected failure")]
    InjectedFailure,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
