//! Subscriber registration.
//!
//! Registrations live in a copy-on-write snapshot: subscribing or
//! unsubscribing swaps in a new `Arc`, and a dispatch pass works on the
//! snapshot it took when it started. A change made mid-cycle therefore
//! takes effect on the next cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use mxsync_core::{ClientEvent, DeviceLists, Membership, RoomId, SyncResponse};
use mxsync_store::Transaction;

/// What a subscriber returns. Any error aborts the cycle.
pub type SubscriberResult = anyhow::Result<()>;

pub(crate) type Handler<T> =
    Arc<dyn Fn(T, DispatchContext) -> BoxFuture<'static, SubscriberResult> + Send + Sync>;

/// Handle returned by every `subscribe_*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Section of the response an event was delivered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    ToDevice,
    GlobalAccountData,
    Presence,
    State,
    Timeline,
    Ephemeral,
    RoomAccountData,
    InviteState,
    KnockState,
}

/// An event together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub event: ClientEvent,
    pub category: EventCategory,
    /// Set for every room-scoped category.
    pub room_id: Option<RoomId>,
    pub membership: Option<Membership>,
}

impl RoutedEvent {
    pub fn event_type(&self) -> &str {
        &self.event.event_type
    }
}

/// Selects which events a subscriber receives.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub categories: Vec<EventCategory>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            categories: Vec::new(),
        }
    }

    pub fn in_category(mut self, category: EventCategory) -> Self {
        self.categories.push(category);
        self
    }

    pub fn matches(&self, event_type: &str, category: EventCategory) -> bool {
        let type_ok = self.event_type.as_deref().map_or(true, |t| t == event_type);
        let category_ok = self.categories.is_empty() || self.categories.contains(&category);
        type_ok && category_ok
    }
}

/// One-time key counters reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneTimeKeysUpdate {
    pub counts: BTreeMap<String, u64>,
    pub unused_fallback_key_types: Option<Vec<String>>,
}

impl OneTimeKeysUpdate {
    pub(crate) fn from_response(response: &SyncResponse) -> Option<Self> {
        if response.device_one_time_keys_count.is_empty()
            && response.device_unused_fallback_key_types.is_none()
        {
            return None;
        }
        Some(Self {
            counts: response.device_one_time_keys_count.clone(),
            unused_fallback_key_types: response.device_unused_fallback_key_types.clone(),
        })
    }
}

/// Handed to every subscriber invocation of one cycle.
///
/// All writes made through [`transaction`](Self::transaction) commit or roll
/// back together with the resume token of the cycle.
#[derive(Clone)]
pub struct DispatchContext {
    tx: Transaction,
    response: Arc<SyncResponse>,
}

impl DispatchContext {
    pub(crate) fn new(tx: Transaction, response: Arc<SyncResponse>) -> Self {
        Self { tx, response }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// The whole response being dispatched.
    pub fn response(&self) -> &SyncResponse {
        &self.response
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("tx", &self.tx.id())
            .field("next_batch", &self.response.next_batch)
            .finish()
    }
}

fn boxed<T, F, Fut>(handler: F) -> Handler<T>
where
    F: Fn(T, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SubscriberResult> + Send + 'static,
{
    Arc::new(move |payload, ctx| handler(payload, ctx).boxed())
}

/// Registrations captured at one point in time.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    pub(crate) device_lists: Vec<(SubscriptionId, Handler<DeviceLists>)>,
    pub(crate) one_time_keys: Vec<(SubscriptionId, Handler<OneTimeKeysUpdate>)>,
    pub(crate) events: Vec<(SubscriptionId, EventFilter, Handler<Arc<RoutedEvent>>)>,
    pub(crate) raw_response: Vec<(SubscriptionId, Handler<Arc<SyncResponse>>)>,
    pub(crate) after_response: Vec<(SubscriptionId, Handler<Arc<SyncResponse>>)>,
}

impl Subscribers {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.len();
        self.device_lists.retain(|(sid, _)| *sid != id);
        self.one_time_keys.retain(|(sid, _)| *sid != id);
        self.events.retain(|(sid, _, _)| *sid != id);
        self.raw_response.retain(|(sid, _)| *sid != id);
        self.after_response.retain(|(sid, _)| *sid != id);
        self.len() != before
    }

    fn len(&self) -> usize {
        self.device_lists.len()
            + self.one_time_keys.len()
            + self.events.len()
            + self.raw_response.len()
            + self.after_response.len()
    }

    /// Event handlers whose filter accepts the given event.
    pub(crate) fn event_handlers(
        &self,
        event_type: &str,
        category: EventCategory,
    ) -> Vec<&Handler<Arc<RoutedEvent>>> {
        self.events
            .iter()
            .filter(|(_, filter, _)| filter.matches(event_type, category))
            .map(|(_, _, handler)| handler)
            .collect()
    }
}

/// Registry of sync subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    current: RwLock<Arc<Subscribers>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, add: impl FnOnce(&mut Subscribers, SubscriptionId)) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut current = self.current.write();
        let mut next = Subscribers::clone(&current);
        add(&mut next, id);
        *current = Arc::new(next);
        id
    }

    /// Called with the device-list changes of each response that has any.
    pub fn subscribe_device_lists<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(DeviceLists, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubscriberResult> + Send + 'static,
    {
        let handler = boxed(handler);
        self.register(|subs, id| subs.device_lists.push((id, handler)))
    }

    /// Called with the one-time key counters of each response that reports them.
    pub fn subscribe_one_time_keys<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(OneTimeKeysUpdate, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubscriberResult> + Send + 'static,
    {
        let handler = boxed(handler);
        self.register(|subs, id| subs.one_time_keys.push((id, handler)))
    }

    /// Called once per event accepted by `filter`.
    pub fn subscribe_events<F, Fut>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<RoutedEvent>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubscriberResult> + Send + 'static,
    {
        let handler = boxed(handler);
        self.register(|subs, id| subs.events.push((id, filter, handler)))
    }

    /// Called with the whole response once global sections are dispatched
    /// and before any room section.
    pub fn subscribe_raw_response<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<SyncResponse>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubscriberResult> + Send + 'static,
    {
        let handler = boxed(handler);
        self.register(|subs, id| subs.raw_response.push((id, handler)))
    }

    /// Called with the whole response after every other subscriber.
    pub fn subscribe_after_response<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<SyncResponse>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubscriberResult> + Send + 'static,
    {
        let handler = boxed(handler);
        self.register(|subs, id| subs.after_response.push((id, handler)))
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut current = self.current.write();
        let mut next = Subscribers::clone(&current);
        if !next.remove(id) {
            return false;
        }
        *current = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Arc<Subscribers> {
        Arc::clone(&self.current.read())
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let any = EventFilter::all();
        assert!(any.matches("m.room.message", EventCategory::Timeline));

        let messages = EventFilter::of_type("m.room.message").in_category(EventCategory::Timeline);
        assert!(messages.matches("m.room.message", EventCategory::Timeline));
        assert!(!messages.matches("m.room.message", EventCategory::State));
        assert!(!messages.matches("m.room.name", EventCategory::Timeline));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_changes() {
        let registry = SubscriberRegistry::new();
        let first = registry.subscribe_events(EventFilter::all(), |_, _| async { Ok(()) });

        let snapshot = registry.snapshot();
        registry.subscribe_events(EventFilter::all(), |_, _| async { Ok(()) });
        assert!(registry.unsubscribe(first));

        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unsubscribe_twice() {
        let registry = SubscriberRegistry::new();
        let id = registry.subscribe_after_response(|_, _| async { Ok(()) });
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_one_time_keys_update_only_when_reported() {
        let mut response = SyncResponse::default();
        assert_eq!(OneTimeKeysUpdate::from_response(&response), None);

        response
            .device_one_time_keys_count
            .insert("signed_curve25519".into(), 50);
        let update = OneTimeKeysUpdate::from_response(&response).unwrap();
        assert_eq!(update.counts["signed_curve25519"], 50);
    }
}
