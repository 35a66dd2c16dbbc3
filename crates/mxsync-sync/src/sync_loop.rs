//! The sync loop state machine.
//!
//! A single background job repeatedly requests the next batch, dispatches it
//! and persists the resume token, all inside one write transaction per
//! cycle. Cycles never overlap: the loop job and [`SyncLoop::start_once`]
//! share a cycle lock, and at most one loop job exists at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use mxsync_core::{ResumeToken, SyncResponse, SyncState};
use mxsync_store::TransactionManager;

use crate::config::SyncConfig;
use crate::dispatcher::{DispatchPhase, EventDispatcher};
use crate::error::{Result, SyncError};
use crate::token::ResumeTokenStore;
use crate::transport::{SyncApi, SyncRequest};

/// Drives the sync cycle and exposes its lifecycle state.
pub struct SyncLoop {
    inner: Arc<LoopInner>,
    job: Mutex<Option<JoinHandle<()>>>,
    abort: parking_lot::Mutex<Option<AbortHandle>>,
}

struct LoopInner {
    api: Arc<dyn SyncApi>,
    dispatcher: Arc<EventDispatcher>,
    transactions: TransactionManager,
    tokens: Arc<dyn ResumeTokenStore>,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    token: watch::Sender<Option<ResumeToken>>,
    cycle_lock: Mutex<()>,
}

impl SyncLoop {
    pub fn new(
        api: Arc<dyn SyncApi>,
        dispatcher: Arc<EventDispatcher>,
        transactions: TransactionManager,
        tokens: Arc<dyn ResumeTokenStore>,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Stopped);
        let (token, _) = watch::channel(None);
        Self {
            inner: Arc::new(LoopInner {
                api,
                dispatcher,
                transactions,
                tokens,
                config,
                state,
                token,
                cycle_lock: Mutex::new(()),
            }),
            job: Mutex::new(None),
            abort: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Observe lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> SyncState {
        self.inner.current()
    }

    /// Observe the last resume token read from or written to the store.
    pub fn resume_token(&self) -> watch::Receiver<Option<ResumeToken>> {
        self.inner.token.subscribe()
    }

    /// Wait until the loop reaches `target`.
    pub async fn wait_for_state(&self, target: SyncState) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Start the background loop, replacing (and first awaiting) any running
    /// one.
    ///
    /// With `wait`, returns only once the loop has stopped again.
    pub async fn start(&self, wait: bool) -> Result<()> {
        {
            let mut job = self.job.lock().await;
            self.retire(&mut job).await;

            let token = self.inner.load_token().await?;
            self.inner.force_state(SyncState::starting(token.is_some()));
            info!(resuming = token.is_some(), "starting sync loop");

            // The guard lives in the task future so an abort before the
            // first poll still ends in `Stopped`.
            let stopped = StoppedOnExit(Arc::clone(&self.inner));
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let _stopped = stopped;
                inner.run().await
            });
            *self.abort.lock() = Some(handle.abort_handle());
            *job = Some(handle);
        }

        if wait {
            self.wait_for_state(SyncState::Stopped).await;
        }
        Ok(())
    }

    /// Run exactly one cycle in the caller's task and return a projection of
    /// the response.
    ///
    /// A running loop is stopped first. The state ends at
    /// [`SyncState::Stopped`] whether the cycle succeeds or not.
    pub async fn start_once<T>(
        &self,
        timeout: Duration,
        project: impl FnOnce(&SyncResponse) -> T,
    ) -> Result<T> {
        let mut job = self.job.lock().await;
        self.retire(&mut job).await;
        let _stopped = StoppedOnExit(Arc::clone(&self.inner));

        let token = self.inner.load_token().await?;
        self.inner.force_state(SyncState::starting(token.is_some()));

        match self.inner.cycle(timeout).await {
            Ok(response) => Ok(project(&response)),
            Err(err) => {
                self.inner.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Ask the loop to exit before its next cycle. An in-flight cycle runs to
    /// completion.
    ///
    /// With `wait`, returns once the loop has exited. Calling this when no
    /// loop is running is a no-op.
    pub async fn stop(&self, wait: bool) {
        let mut job = self.job.lock().await;
        if job.as_ref().map_or(true, JoinHandle::is_finished) {
            return;
        }

        info!("stopping sync loop");
        self.inner.request_stop();
        if wait {
            self.retire(&mut job).await;
        }
    }

    /// Abort the loop job at its next suspension point. An interrupted cycle
    /// commits nothing.
    ///
    /// The registered job is aborted right away, even while `start` or
    /// `stop` hold the job lock. With `wait`, the job registered once the
    /// lock is free is aborted too, and this returns after it has exited.
    pub async fn cancel(&self, wait: bool) {
        let abort = self.abort.lock().take();
        if let Some(abort) = abort {
            info!("cancelling sync loop");
            abort.abort();
        }

        if wait {
            let mut job = self.job.lock().await;
            if let Some(handle) = job.as_ref() {
                handle.abort();
            }
            self.retire(&mut job).await;
        }
    }

    /// Stop and await the current job, if any.
    ///
    /// The handle stays registered until the job has exited, so `cancel`
    /// can still reach it and a dropped caller leaves nothing unowned.
    async fn retire(&self, job: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = job.as_mut() {
            self.inner.request_stop();
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!("sync loop job panicked");
                }
            }
        }
        *job = None;
        *self.abort.lock() = None;
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.get_mut().take() {
            abort.abort();
        }
    }
}

impl std::fmt::Debug for SyncLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoop")
            .field("state", &self.inner.current())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl LoopInner {
    fn current(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Move to `next` unless a stop has been requested.
    fn update_state(&self, next: SyncState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == SyncState::Stopping || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "sync state changed");
        }
    }

    fn force_state(&self, next: SyncState) {
        if self.state.send_replace(next) != next {
            debug!(state = %next, "sync state changed");
        }
    }

    fn request_stop(&self) {
        self.state.send_if_modified(|current| match current {
            SyncState::Stopped | SyncState::Stopping => false,
            _ => {
                *current = SyncState::Stopping;
                true
            }
        });
    }

    fn record_failure(&self, err: &SyncError) {
        let failed = if err.is_timeout() {
            SyncState::Timeout
        } else {
            SyncState::Error
        };
        warn!(error = %err, state = %failed, "sync cycle failed");
        self.update_state(failed);
    }

    async fn load_token(&self) -> Result<Option<ResumeToken>> {
        let tokens = Arc::clone(&self.tokens);
        let token = self
            .transactions
            .read_transaction(|tx| async move { tokens.load(&tx).await })
            .await?;

        self.token.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token.clone();
            true
        });
        Ok(token)
    }

    async fn run(&self) {
        loop {
            let state = self.current();
            if state == SyncState::Stopping {
                break;
            }

            let timeout = if state.wants_immediate_response() {
                Duration::ZERO
            } else {
                self.config.timeout
            };

            match self.cycle(timeout).await {
                Ok(response) => {
                    self.update_state(SyncState::Running);
                    debug!(
                        next_batch = %response.next_batch,
                        events = response.event_count(),
                        "sync cycle complete"
                    );
                }
                Err(err) => {
                    self.record_failure(&err);
                    if !self.current().is_failure() {
                        // Stop requested mid-cycle.
                        continue;
                    }
                    self.pause(self.config.retry_delay).await;
                    let has_token = self.token.borrow().is_some();
                    self.update_state(SyncState::starting(has_token));
                }
            }
        }
    }

    /// Sleep for `delay`, waking early if a stop is requested.
    async fn pause(&self, delay: Duration) {
        let mut rx = self.state.subscribe();
        let stop_requested = async move {
            let _ = rx.wait_for(|state| *state == SyncState::Stopping).await;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_requested => {}
        }
    }

    /// One request, dispatch and token save.
    async fn cycle(&self, timeout: Duration) -> Result<Arc<SyncResponse>> {
        let _cycle = self.cycle_lock.lock().await;

        let since = self.load_token().await?;
        let request = SyncRequest {
            since: since.clone(),
            timeout,
            filter: self.config.filter.clone(),
            set_presence: self.config.set_presence,
        };
        let deadline = self.config.deadline_for(timeout);
        debug!(?since, timeout_ms = timeout.as_millis() as u64, "sending sync request");

        let response = match tokio::time::timeout(deadline, self.api.sync(request)).await {
            Ok(result) => Arc::new(result?),
            Err(_) => return Err(SyncError::Timeout(deadline)),
        };

        let next = response.next_token();
        let dispatcher = &self.dispatcher;
        let tokens = &self.tokens;
        let on_phase = |phase: DispatchPhase| {
            if phase == DispatchPhase::RawResponse {
                self.update_state(SyncState::Running);
            }
        };

        self.transactions
            .write_transaction(|tx| {
                let response = Arc::clone(&response);
                let next = &next;
                async move {
                    dispatcher.dispatch(response, &tx, &on_phase).await?;
                    tokens.save(&tx, next).await?;
                    Ok::<_, SyncError>(())
                }
            })
            .await?;

        self.token.send_replace(Some(next));
        Ok(response)
    }
}

/// Sets [`SyncState::Stopped`] when a job ends, however it ends.
struct StoppedOnExit(Arc<LoopInner>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.force_state(SyncState::Stopped);
        debug!("sync job exited");
    }
}
