//! Test fixtures and helpers.
//!
//! Builders for sync responses and a subscriber that records what it saw.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use mxsync_core::{ClientEvent, RoomId, SyncResponse, UnreadNotificationsCount, UserId};
use mxsync_sync::{EventCategory, EventFilter, SubscriberRegistry, SubscriptionId};

/// `!{name}:example.org`
pub fn room_id(name: &str) -> RoomId {
    RoomId::parse(format!("!{}:example.org", name)).expect("fixture room id is valid")
}

/// `@{name}:example.org`
pub fn user_id(name: &str) -> UserId {
    UserId::parse(format!("@{}:example.org", name)).expect("fixture user id is valid")
}

/// A plain text message.
pub fn message(event_id: &str, body: &str) -> ClientEvent {
    ClientEvent::new("m.room.message", json!({ "msgtype": "m.text", "body": body }))
        .with_event_id(event_id)
        .with_sender(user_id("alice"))
}

/// An encrypted message that needs the megolm session `session_id`.
pub fn encrypted(event_id: &str, session_id: &str) -> ClientEvent {
    ClientEvent::new(
        "m.room.encrypted",
        json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "session_id": session_id,
            "ciphertext": "AwgAEn...",
        }),
    )
    .with_event_id(event_id)
    .with_sender(user_id("alice"))
}

/// A to-device room key for `session_id` in `room`.
pub fn room_key(sender: &UserId, room: &RoomId, session_id: &str) -> ClientEvent {
    ClientEvent::new(
        "m.room_key",
        json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "room_id": room.as_str(),
            "session_id": session_id,
            "session_key": "AgAAAAB...",
        }),
    )
    .with_sender(sender.clone())
}

/// A state event.
pub fn state(event_type: &str, state_key: &str, content: Value) -> ClientEvent {
    ClientEvent::new(event_type, content).with_state_key(state_key)
}

/// An `m.room.member` event for `user`.
pub fn member(user: &UserId, membership: &str) -> ClientEvent {
    state("m.room.member", user.as_str(), json!({ "membership": membership }))
        .with_sender(user.clone())
}

/// Fluent builder for [`SyncResponse`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: SyncResponse,
}

impl ResponseBuilder {
    pub fn new(next_batch: &str) -> Self {
        Self {
            response: SyncResponse {
                next_batch: next_batch.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn to_device(mut self, event: ClientEvent) -> Self {
        self.response.to_device.events.push(event);
        self
    }

    pub fn account_data(mut self, event: ClientEvent) -> Self {
        self.response.account_data.events.push(event);
        self
    }

    pub fn presence(mut self, event: ClientEvent) -> Self {
        self.response.presence.events.push(event);
        self
    }

    pub fn device_changed(mut self, user: UserId) -> Self {
        self.response.device_lists.changed.push(user);
        self
    }

    pub fn device_left(mut self, user: UserId) -> Self {
        self.response.device_lists.left.push(user);
        self
    }

    pub fn one_time_keys(mut self, algorithm: &str, count: u64) -> Self {
        self.response
            .device_one_time_keys_count
            .insert(algorithm.to_string(), count);
        self
    }

    pub fn fallback_key_types(mut self, types: &[&str]) -> Self {
        self.response.device_unused_fallback_key_types =
            Some(types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn joined_state(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.joined(room).state.events.push(event);
        self
    }

    pub fn joined_timeline(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.joined(room).timeline.events.push(event);
        self
    }

    pub fn joined_ephemeral(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.joined(room).ephemeral.events.push(event);
        self
    }

    pub fn joined_account_data(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.joined(room).account_data.events.push(event);
        self
    }

    /// Mark the joined room's timeline as having a gap before `prev_batch`.
    pub fn limited(mut self, room: &RoomId, prev_batch: &str) -> Self {
        let timeline = &mut self.joined(room).timeline;
        timeline.limited = true;
        timeline.prev_batch = Some(prev_batch.to_string());
        self
    }

    pub fn unread(mut self, room: &RoomId, highlight_count: u64, notification_count: u64) -> Self {
        self.joined(room).unread_notifications = Some(UnreadNotificationsCount {
            highlight_count,
            notification_count,
        });
        self
    }

    pub fn invite_state(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.response
            .rooms
            .invite
            .entry(room.clone())
            .or_default()
            .invite_state
            .events
            .push(event);
        self
    }

    pub fn knock_state(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.response
            .rooms
            .knock
            .entry(room.clone())
            .or_default()
            .knock_state
            .events
            .push(event);
        self
    }

    pub fn left_state(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.left(room).state.events.push(event);
        self
    }

    pub fn left_timeline(mut self, room: &RoomId, event: ClientEvent) -> Self {
        self.left(room).timeline.events.push(event);
        self
    }

    pub fn build(self) -> SyncResponse {
        self.response
    }

    fn joined(&mut self, room: &RoomId) -> &mut mxsync_core::JoinedRoom {
        self.response.rooms.join.entry(room.clone()).or_default()
    }

    fn left(&mut self, room: &RoomId) -> &mut mxsync_core::LeftRoom {
        self.response.rooms.leave.entry(room.clone()).or_default()
    }
}

/// One subscriber invocation seen by an [`EventRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    DeviceLists { changed: usize, left: usize },
    OneTimeKeys,
    Event {
        category: EventCategory,
        event_type: String,
        room_id: Option<RoomId>,
        event_id: Option<String>,
    },
    RawResponse(String),
    AfterResponse(String),
}

impl Delivery {
    pub fn is_category(&self, wanted: EventCategory) -> bool {
        matches!(self, Delivery::Event { category, .. } if *category == wanted)
    }
}

/// Subscribes to everything and records deliveries in order.
pub struct EventRecorder {
    log: Arc<Mutex<Vec<Delivery>>>,
    ids: Vec<SubscriptionId>,
}

impl EventRecorder {
    pub fn attach(registry: &SubscriberRegistry) -> Self {
        let log: Arc<Mutex<Vec<Delivery>>> = Arc::default();
        let mut ids = Vec::new();

        let l = log.clone();
        ids.push(registry.subscribe_device_lists(move |lists, _| {
            l.lock().push(Delivery::DeviceLists {
                changed: lists.changed.len(),
                left: lists.left.len(),
            });
            async { Ok(()) }
        }));

        let l = log.clone();
        ids.push(registry.subscribe_one_time_keys(move |_, _| {
            l.lock().push(Delivery::OneTimeKeys);
            async { Ok(()) }
        }));

        let l = log.clone();
        ids.push(registry.subscribe_events(EventFilter::all(), move |routed, _| {
            l.lock().push(Delivery::Event {
                category: routed.category,
                event_type: routed.event.event_type.clone(),
                room_id: routed.room_id.clone(),
                event_id: routed.event.event_id.clone(),
            });
            async { Ok(()) }
        }));

        let l = log.clone();
        ids.push(registry.subscribe_raw_response(move |response, _| {
            l.lock().push(Delivery::RawResponse(response.next_batch.clone()));
            async { Ok(()) }
        }));

        let l = log.clone();
        ids.push(registry.subscribe_after_response(move |response, _| {
            l.lock().push(Delivery::AfterResponse(response.next_batch.clone()));
            async { Ok(()) }
        }));

        Self { log, ids }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    /// Index of the first delivery matching `pred`.
    pub fn position(&self, pred: impl Fn(&Delivery) -> bool) -> Option<usize> {
        self.log.lock().iter().position(pred)
    }

    /// Index of the last delivery matching `pred`.
    pub fn last_position(&self, pred: impl Fn(&Delivery) -> bool) -> Option<usize> {
        self.log.lock().iter().rposition(pred)
    }

    pub fn event_ids(&self, category: EventCategory) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|d| d.is_category(category))
            .filter_map(|d| match d {
                Delivery::Event { event_id, .. } => event_id.clone(),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Remove every subscription this recorder made.
    pub fn detach(self, registry: &SubscriberRegistry) {
        for id in self.ids {
            registry.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_groups_sections_by_room() {
        let a = room_id("a");
        let response = ResponseBuilder::new("s1")
            .joined_state(&a, member(&user_id("alice"), "join"))
            .joined_timeline(&a, message("$1", "hi"))
            .joined_timeline(&a, message("$2", "there"))
            .limited(&a, "p0")
            .to_device(room_key(&user_id("bob"), &a, "S1"))
            .build();

        let joined = &response.rooms.join[&a];
        assert_eq!(joined.timeline.events.len(), 2);
        assert!(joined.timeline.limited);
        assert_eq!(response.event_count(), 4);
    }

    #[test]
    fn test_member_event_is_state() {
        let event = member(&user_id("bob"), "invite");
        assert_eq!(
            event.state_slot().as_deref(),
            Some("m.room.member|@bob:example.org")
        );
    }
}
