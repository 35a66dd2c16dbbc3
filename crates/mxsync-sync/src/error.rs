//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`SyncApi`](crate::SyncApi) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server or an intermediary gave up waiting.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or broke mid-request.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },

    /// The body could not be decoded into a sync response.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors that can occur during a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request failed at the transport level.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived within the client-side deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] mxsync_store::StoreError),

    /// A subscriber returned an error; the cycle was rolled back.
    #[error("subscriber failed: {0:#}")]
    Subscriber(#[source] anyhow::Error),
}

impl SyncError {
    /// Whether the failure should surface as [`SyncState::Timeout`](mxsync_core::SyncState::Timeout).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout(_) | SyncError::Transport(TransportError::Timeout)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
