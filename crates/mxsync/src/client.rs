//! The SyncClient: sync loop, dispatcher and persisted mirror in one place.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use mxsync_core::{ClientEvent, ResumeToken, RoomId, SyncResponse, SyncState, UserId};
use mxsync_store::{StoreBackend, Transaction, TransactionManager};
use mxsync_sync::{
    EventCategory, EventDispatcher, EventFilter, RepositoryTokenStore, ResumeTokenStore,
    SubscriberRegistry, SubscriptionId, SyncApi, SyncConfig, SyncLoop,
};

use crate::error::Result;
use crate::mirror::{self, OneTimeKeyCounts, StoredRoom};

/// Configuration for the SyncClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sync loop configuration.
    pub sync: SyncConfig,
    /// Whether timeline events are stored. Room summaries are kept either way.
    pub persist_timeline: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            persist_timeline: true,
        }
    }
}

impl ClientConfig {
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_persist_timeline(mut self, persist: bool) -> Self {
        self.persist_timeline = persist;
        self
    }
}

/// A syncing client with a local mirror of what it has seen.
///
/// Provides:
/// - Loop control (`start`, `start_once`, `stop`, `cancel`)
/// - Subscriber registration through [`subscribers`](Self::subscribers)
/// - Read queries over the persisted mirror
pub struct SyncClient {
    transactions: TransactionManager,
    tokens: Arc<RepositoryTokenStore>,
    sync: SyncLoop,
    builtin: Vec<SubscriptionId>,
}

impl SyncClient {
    /// Create a client and register the built-in persistence subscribers.
    pub fn new(api: Arc<dyn SyncApi>, backend: Arc<dyn StoreBackend>, config: ClientConfig) -> Self {
        let transactions = TransactionManager::new(backend);
        let dispatcher = Arc::new(EventDispatcher::new());
        let tokens = Arc::new(RepositoryTokenStore::new());
        let builtin = register_persistence(dispatcher.registry(), config.persist_timeline);

        let sync = SyncLoop::new(
            api,
            dispatcher,
            transactions.clone(),
            tokens.clone(),
            config.sync,
        );

        Self {
            transactions,
            tokens,
            sync,
            builtin,
        }
    }

    /// Register application subscribers here.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        self.sync.dispatcher().registry()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.sync.dispatcher()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Ids of the built-in persistence subscribers.
    pub fn builtin_subscriptions(&self) -> &[SubscriptionId] {
        &self.builtin
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loop Control
    // ─────────────────────────────────────────────────────────────────────────

    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync.state()
    }

    pub fn current_state(&self) -> SyncState {
        self.sync.current_state()
    }

    /// Observe the resume token as cycles commit.
    pub fn resume_token_updates(&self) -> watch::Receiver<Option<ResumeToken>> {
        self.sync.resume_token()
    }

    pub async fn wait_for_state(&self, state: SyncState) {
        self.sync.wait_for_state(state).await
    }

    pub async fn start(&self, wait: bool) -> Result<()> {
        info!("client sync starting");
        Ok(self.sync.start(wait).await?)
    }

    pub async fn start_once<T>(
        &self,
        timeout: Duration,
        project: impl FnOnce(&SyncResponse) -> T,
    ) -> Result<T> {
        Ok(self.sync.start_once(timeout, project).await?)
    }

    pub async fn stop(&self, wait: bool) {
        self.sync.stop(wait).await
    }

    pub async fn cancel(&self, wait: bool) {
        self.sync.cancel(wait).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn read<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = mxsync_store::Result<T>>,
    {
        Ok(self.transactions.read_transaction(body).await?)
    }

    pub async fn room(&self, room_id: &RoomId) -> Result<Option<StoredRoom>> {
        self.read(|tx| async move { mirror::ROOMS.get(&tx, room_id).await })
            .await
    }

    /// Every known room, ordered by room id.
    pub async fn rooms(&self) -> Result<Vec<StoredRoom>> {
        let rooms = self
            .read(|tx| async move { mirror::ROOMS.get_all(&tx).await })
            .await?;
        Ok(rooms.into_iter().map(|(_, room)| room).collect())
    }

    /// Current state of a room, keyed by `type|state_key`.
    pub async fn room_state(&self, room_id: &RoomId) -> Result<BTreeMap<String, ClientEvent>> {
        self.read(|tx| async move { mirror::ROOM_STATE.get(&tx, room_id).await })
            .await
    }

    pub async fn state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<ClientEvent>> {
        let slot = format!("{}|{}", event_type, state_key);
        self.read(|tx| async move { mirror::ROOM_STATE.get_entry(&tx, room_id, &slot).await })
            .await
    }

    /// Stored timeline of a room, oldest first.
    pub async fn timeline(&self, room_id: &RoomId) -> Result<Vec<ClientEvent>> {
        let events = self
            .read(|tx| async move { mirror::TIMELINE.get(&tx, room_id).await })
            .await?;
        Ok(events.into_values().collect())
    }

    pub async fn global_account_data(&self, event_type: &str) -> Result<Option<ClientEvent>> {
        let event_type = event_type.to_string();
        self.read(|tx| async move { mirror::GLOBAL_ACCOUNT_DATA.get(&tx, &event_type).await })
            .await
    }

    pub async fn room_account_data(
        &self,
        room_id: &RoomId,
        event_type: &str,
    ) -> Result<Option<ClientEvent>> {
        let event_type = event_type.to_string();
        self.read(|tx| async move {
            mirror::ROOM_ACCOUNT_DATA
                .get_entry(&tx, room_id, &event_type)
                .await
        })
        .await
    }

    /// Users whose device keys need to be downloaded again.
    pub async fn outdated_device_keys(&self) -> Result<Vec<UserId>> {
        let users = self
            .read(|tx| async move { mirror::OUTDATED_DEVICE_KEYS.get_all(&tx).await })
            .await?;
        Ok(users.into_iter().map(|(user, _)| user).collect())
    }

    pub async fn one_time_key_counts(&self) -> Result<Option<OneTimeKeyCounts>> {
        self.read(|tx| async move { mirror::load_one_time_keys(&tx).await })
            .await
    }

    /// The committed resume token, read from the store.
    pub async fn resume_token(&self) -> Result<Option<ResumeToken>> {
        let tokens = Arc::clone(&self.tokens);
        self.read(|tx| async move { tokens.load(&tx).await }).await
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("sync", &self.sync)
            .field("builtin_subscriptions", &self.builtin.len())
            .finish()
    }
}

/// Register the subscribers that keep the local mirror up to date.
fn register_persistence(registry: &SubscriberRegistry, persist_timeline: bool) -> Vec<SubscriptionId> {
    let mut ids = Vec::new();

    ids.push(registry.subscribe_device_lists(|lists, ctx| async move {
        mirror::save_device_lists(ctx.transaction(), &lists)
            .await
            .context("saving device lists")
    }));

    ids.push(registry.subscribe_one_time_keys(|update, ctx| async move {
        mirror::save_one_time_keys(ctx.transaction(), &update)
            .await
            .context("saving one-time key counts")
    }));

    ids.push(registry.subscribe_raw_response(|response, ctx| async move {
        mirror::save_rooms(ctx.transaction(), &response)
            .await
            .context("saving rooms")
    }));

    let state = EventFilter::all()
        .in_category(EventCategory::State)
        .in_category(EventCategory::Timeline)
        .in_category(EventCategory::InviteState)
        .in_category(EventCategory::KnockState);
    ids.push(registry.subscribe_events(state, |routed, ctx| async move {
        mirror::save_state_event(ctx.transaction(), &routed)
            .await
            .with_context(|| format!("saving state event {}", routed.event_type()))
    }));

    let account_data = EventFilter::all()
        .in_category(EventCategory::GlobalAccountData)
        .in_category(EventCategory::RoomAccountData);
    ids.push(registry.subscribe_events(account_data, |routed, ctx| async move {
        mirror::save_account_data(ctx.transaction(), &routed)
            .await
            .with_context(|| format!("saving account data {}", routed.event_type()))
    }));

    if persist_timeline {
        let timeline = EventFilter::all().in_category(EventCategory::Timeline);
        ids.push(registry.subscribe_events(timeline, |routed, ctx| async move {
            mirror::append_timeline_event(ctx.transaction(), &routed)
                .await
                .context("appending timeline event")
        }));
    }

    ids
}
