//! Transport abstraction for the `/sync` endpoint.
//!
//! The loop only needs one operation: send a long-poll request and get a
//! decoded response back. HTTP, retries at the connection level and
//! authentication all live behind [`SyncApi`].

use std::time::Duration;

use async_trait::async_trait;

use mxsync_core::{PresenceState, ResumeToken, SyncResponse};

use crate::error::TransportError;

/// Parameters of one long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Resume token; `None` requests a full initial sync.
    pub since: Option<ResumeToken>,

    /// How long the server may hold the request open when nothing is new.
    pub timeout: Duration,

    pub filter: Option<String>,

    pub set_presence: Option<PresenceState>,
}

/// The remote sync endpoint.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Perform one long-poll request.
    async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, TransportError>;
}

/// A scripted in-memory endpoint for testing.
///
/// Responses are played back in the order they were pushed. When the script
/// runs dry the endpoint behaves like an idle server: it holds the request
/// for its timeout (or until a new step is pushed) and then answers with an
/// empty response that keeps the current token.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// One scripted reply.
    #[derive(Debug, Clone)]
    pub enum ScriptStep {
        Respond(SyncResponse),
        Fail(TransportError),
        /// Respond after holding the request for the given duration.
        Delayed(Duration, SyncResponse),
    }

    /// Scripted [`SyncApi`] that records every request it receives.
    #[derive(Debug, Default)]
    pub struct ScriptedSyncApi {
        steps: Mutex<VecDeque<ScriptStep>>,
        requests: Mutex<Vec<SyncRequest>>,
        pushed: Notify,
    }

    impl ScriptedSyncApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, step: ScriptStep) {
            self.steps.lock().push_back(step);
            self.pushed.notify_one();
        }

        pub fn push_response(&self, response: SyncResponse) {
            self.push(ScriptStep::Respond(response));
        }

        pub fn push_error(&self, error: TransportError) {
            self.push(ScriptStep::Fail(error));
        }

        pub fn push_delayed(&self, delay: Duration, response: SyncResponse) {
            self.push(ScriptStep::Delayed(delay, response));
        }

        /// Every request received so far, oldest first.
        pub fn requests(&self) -> Vec<SyncRequest> {
            self.requests.lock().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }

        /// Steps not yet played back.
        pub fn remaining(&self) -> usize {
            self.steps.lock().len()
        }

        async fn play(step: ScriptStep) -> Result<SyncResponse, TransportError> {
            match step {
                ScriptStep::Respond(response) => Ok(response),
                ScriptStep::Fail(error) => Err(error),
                ScriptStep::Delayed(delay, response) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
            }
        }

        fn idle_response(since: Option<&ResumeToken>) -> SyncResponse {
            SyncResponse {
                next_batch: since.map_or("s0", ResumeToken::as_str).to_string(),
                ..SyncResponse::default()
            }
        }
    }

    #[async_trait]
    impl SyncApi for ScriptedSyncApi {
        async fn sync(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
            let since = request.since.clone();
            let deadline = tokio::time::Instant::now() + request.timeout;
            self.requests.lock().push(request);

            loop {
                let next = self.steps.lock().pop_front();
                if let Some(step) = next {
                    return Self::play(step).await;
                }
                let pushed = self.pushed.notified();
                if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                    return Ok(Self::idle_response(since.as_ref()));
                }
            }
        }
    }
}
