//! Observable lifecycle state of the sync loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the sync loop.
///
/// ```text
/// Stopped ──start()──> InitialSync | Started ──cycle ok──> Running
///    ^                      ^                                 │
///    │                      └──── delay ─── Timeout | Error <─┘
///    └──── Stopping <──stop()── any
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// First sync ever: no resume token stored yet.
    InitialSync,
    /// Resuming from a stored token.
    Started,
    /// At least one cycle succeeded since the last (re)start.
    Running,
    /// The last cycle failed for a reason other than a timeout.
    Error,
    /// The last request timed out.
    Timeout,
    /// A stop was requested; the loop exits before its next cycle.
    Stopping,
    /// No loop job is running.
    Stopped,
}

impl SyncState {
    /// State entered when (re)starting, depending on whether a token exists.
    pub fn starting(has_token: bool) -> Self {
        if has_token {
            SyncState::Started
        } else {
            SyncState::InitialSync
        }
    }

    /// Whether the next request should return immediately (zero timeout).
    pub fn wants_immediate_response(&self) -> bool {
        matches!(self, SyncState::InitialSync | SyncState::Started)
    }

    /// Whether the state reflects a failed cycle awaiting retry.
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncState::Error | SyncState::Timeout)
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Stopped
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::InitialSync => "initial_sync",
            SyncState::Started => "started",
            SyncState::Running => "running",
            SyncState::Error => "error",
            SyncState::Timeout => "timeout",
            SyncState::Stopping => "stopping",
            SyncState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_state_depends_on_token() {
        assert_eq!(SyncState::starting(false), SyncState::InitialSync);
        assert_eq!(SyncState::starting(true), SyncState::Started);
    }

    #[test]
    fn test_immediate_response_states() {
        assert!(SyncState::InitialSync.wants_immediate_response());
        assert!(SyncState::Started.wants_immediate_response());
        assert!(!SyncState::Running.wants_immediate_response());
        assert!(!SyncState::Timeout.wants_immediate_response());
    }

    #[test]
    fn test_failure_states() {
        assert!(SyncState::Error.is_failure());
        assert!(SyncState::Timeout.is_failure());
        assert!(!SyncState::Stopping.is_failure());
        assert!(!SyncState::Running.is_failure());
    }

    #[test]
    fn test_default_is_stopped() {
        assert_eq!(SyncState::default(), SyncState::Stopped);
        assert_eq!(SyncState::Stopping.to_string(), "stopping");
    }
}
