//! Sync loop configuration.

use std::time::Duration;

use mxsync_core::PresenceState;

/// Upper bound on the delay between a failed cycle and the next attempt.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Configuration for a [`SyncLoop`](crate::SyncLoop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Long-poll timeout sent with each request once the loop is running.
    pub timeout: Duration,

    /// Pause after a failed cycle before retrying.
    pub retry_delay: Duration,

    /// Extra time the client waits beyond `timeout` before giving up on a
    /// request itself.
    pub request_grace: Duration,

    /// Server-side filter id or inline filter JSON.
    pub filter: Option<String>,

    /// Presence to advertise while syncing.
    pub set_presence: Option<PresenceState>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            request_grace: Duration::from_secs(10),
            filter: None,
            set_presence: None,
        }
    }
}

impl SyncConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry delay, clamped to [`MAX_RETRY_DELAY`].
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay.min(MAX_RETRY_DELAY);
        self
    }

    pub fn with_request_grace(mut self, grace: Duration) -> Self {
        self.request_grace = grace;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_presence(mut self, presence: PresenceState) -> Self {
        self.set_presence = Some(presence);
        self
    }

    /// Client-side deadline for a request sent with `timeout`.
    pub(crate) fn deadline_for(&self, timeout: Duration) -> Duration {
        timeout.saturating_add(self.request_grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.deadline_for(config.timeout), Duration::from_secs(40));
    }

    #[test]
    fn test_retry_delay_is_clamped() {
        let config = SyncConfig::default().with_retry_delay(Duration::from_secs(3600));
        assert_eq!(config.retry_delay, MAX_RETRY_DELAY);
    }

    proptest::proptest! {
        #[test]
        fn test_retry_delay_never_exceeds_cap(ms in 0u64..10_000_000) {
            let config = SyncConfig::default().with_retry_delay(Duration::from_millis(ms));
            proptest::prop_assert!(config.retry_delay <= MAX_RETRY_DELAY);
        }

        #[test]
        fn test_deadline_covers_long_poll(secs in 0u64..u64::MAX) {
            let config = SyncConfig::default();
            let timeout = Duration::from_secs(secs);
            proptest::prop_assert!(config.deadline_for(timeout) >= timeout);
        }
    }
}
