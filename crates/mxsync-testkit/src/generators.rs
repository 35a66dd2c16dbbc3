//! Proptest generators for sync responses.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;

use mxsync_core::{
    ClientEvent, EventList, InvitedRoom, JoinedRoom, LeftRoom, RoomId, SyncResponse, Timeline,
    UserId,
};

/// Generate a room id on a fixed server.
pub fn room_id() -> impl Strategy<Value = RoomId> {
    "[a-z]{1,6}".prop_map(|local| {
        RoomId::parse(format!("!{}:example.org", local)).expect("generated room id is valid")
    })
}

/// Generate a user id on a fixed server.
pub fn user_id() -> impl Strategy<Value = UserId> {
    "[a-z]{1,8}".prop_map(|local| {
        UserId::parse(format!("@{}:example.org", local)).expect("generated user id is valid")
    })
}

/// Generate an event of one of the given types, with a unique-enough id.
pub fn event(types: &'static [&'static str]) -> impl Strategy<Value = ClientEvent> {
    (prop::sample::select(types), "[A-Za-z0-9]{12}", any::<u32>()).prop_map(
        |(event_type, id, n)| {
            ClientEvent::new(event_type, json!({ "n": n })).with_event_id(format!("${}", id))
        },
    )
}

/// Generate a state event.
pub fn state_event() -> impl Strategy<Value = ClientEvent> {
    (event(&["m.room.name", "m.room.topic", "m.room.member"]), "[a-z]{0,4}")
        .prop_map(|(event, key)| event.with_state_key(key))
}

fn events(
    strategy: impl Strategy<Value = ClientEvent>,
    max: usize,
) -> impl Strategy<Value = EventList> {
    prop::collection::vec(strategy, 0..=max).prop_map(EventList::new)
}

/// Generate a joined room section.
pub fn joined_room() -> impl Strategy<Value = JoinedRoom> {
    (
        events(state_event(), 3),
        prop::collection::vec(event(&["m.room.message", "m.room.encrypted"]), 0..=5),
        any::<bool>(),
        events(event(&["m.typing", "m.receipt"]), 2),
        events(event(&["m.fully_read", "m.tag"]), 2),
    )
        .prop_map(|(state, timeline, limited, ephemeral, account_data)| JoinedRoom {
            state,
            timeline: Timeline {
                events: timeline,
                limited,
                prev_batch: limited.then(|| "p0".to_string()),
            },
            ephemeral,
            account_data,
            unread_notifications: None,
        })
}

/// Generate an invited room section.
pub fn invited_room() -> impl Strategy<Value = InvitedRoom> {
    events(state_event(), 3).prop_map(|invite_state| InvitedRoom { invite_state })
}

/// Generate a left room section.
pub fn left_room() -> impl Strategy<Value = LeftRoom> {
    (
        events(state_event(), 2),
        prop::collection::vec(event(&["m.room.message"]), 0..=3),
    )
        .prop_map(|(state, timeline)| LeftRoom {
            state,
            timeline: Timeline {
                events: timeline,
                ..Default::default()
            },
            account_data: EventList::default(),
        })
}

/// Generate a whole response touching every section.
pub fn sync_response() -> impl Strategy<Value = SyncResponse> {
    (
        "s[0-9]{1,6}",
        prop::collection::vec(user_id(), 0..3),
        events(event(&["m.room_key", "m.room_key_request", "m.secret.send"]), 4),
        events(event(&["m.push_rules", "m.direct"]), 2),
        events(event(&["m.presence"]), 2),
        prop::collection::btree_map(room_id(), joined_room(), 0..3),
        prop::collection::btree_map(room_id(), invited_room(), 0..2),
        prop::collection::btree_map(room_id(), left_room(), 0..2),
        prop::option::of(1u64..100),
    )
        .prop_map(
            |(next_batch, changed, to_device, account_data, presence, join, invite, leave, keys)| {
                let mut response = SyncResponse {
                    next_batch,
                    to_device,
                    account_data,
                    presence,
                    ..Default::default()
                };
                response.device_lists.changed = changed;
                response.device_one_time_keys_count = keys
                    .map(|count| BTreeMap::from([("signed_curve25519".to_string(), count)]))
                    .unwrap_or_default();
                response.rooms.join = join;
                response.rooms.invite = invite;
                response.rooms.leave = leave;
                response
            },
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{Delivery, EventRecorder};
    use mxsync_store::{MemoryStore, TransactionManager};
    use mxsync_sync::{DispatchPhase, EventCategory, EventDispatcher};

    fn dispatch(response: SyncResponse) -> EventRecorder {
        let dispatcher = EventDispatcher::new();
        let recorder = EventRecorder::attach(dispatcher.registry());
        let manager = TransactionManager::new(Arc::new(MemoryStore::new()));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let response = Arc::new(response);
            manager
                .write_transaction(|tx| async move {
                    dispatcher
                        .dispatch(response, &tx, &|_: DispatchPhase| {})
                        .await
                })
                .await
                .unwrap();
        });
        recorder
    }

    proptest! {
        #[test]
        fn test_every_event_is_delivered_once(response in sync_response()) {
            let expected = response.event_count();
            let recorder = dispatch(response);
            let delivered = recorder
                .deliveries()
                .iter()
                .filter(|d| matches!(d, Delivery::Event { .. }))
                .count();
            prop_assert_eq!(delivered, expected);
        }

        #[test]
        fn test_to_device_precedes_every_room_event(response in sync_response()) {
            let recorder = dispatch(response);

            let last_to_device = recorder.last_position(|d| d.is_category(EventCategory::ToDevice));
            let first_timeline = recorder.position(|d| d.is_category(EventCategory::Timeline));
            if let (Some(to_device), Some(timeline)) = (last_to_device, first_timeline) {
                prop_assert!(to_device < timeline);
            }

            let raw = recorder.position(|d| matches!(d, Delivery::RawResponse(_))).unwrap();
            let room_scoped = recorder.position(|d| {
                matches!(d, Delivery::Event { room_id: Some(_), .. }) || d.is_category(EventCategory::Presence)
            });
            if let Some(first_room) = room_scoped {
                prop_assert!(raw < first_room);
            }

            let deliveries = recorder.deliveries();
            prop_assert!(matches!(deliveries.last(), Some(Delivery::AfterResponse(_))));
        }

        #[test]
        fn test_room_timeline_order_is_preserved(response in sync_response()) {
            let joined: Vec<(RoomId, Vec<String>)> = response
                .rooms
                .join
                .iter()
                .filter(|(room, _)| !response.rooms.leave.contains_key(*room))
                .map(|(room, section)| {
                    let ids = section.timeline.events.iter().filter_map(|e| e.event_id.clone());
                    (room.clone(), ids.collect())
                })
                .collect();
            let recorder = dispatch(response);
            let deliveries = recorder.deliveries();

            for (room, expected) in joined {
                let delivered: Vec<String> = deliveries
                    .iter()
                    .filter_map(|d| match d {
                        Delivery::Event {
                            category: EventCategory::Timeline,
                            room_id: Some(r),
                            event_id,
                            ..
                        } if *r == room => event_id.clone(),
                        _ => None,
                    })
                    .collect();
                prop_assert_eq!(delivered, expected);
            }
        }
    }
}
