//! Error types for the mxsync core model.

use thiserror::Error;

/// Errors raised while building or decoding core model values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid {kind} identifier: {value:?}")]
    InvalidId { kind: &'static str, value: String },

    #[error("decoding error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
