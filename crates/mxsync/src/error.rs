//! Error types for the client facade.

use mxsync_core::CoreError;
use mxsync_store::StoreError;
use mxsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed identifier or response body.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
