//! Phase ordering of the event dispatcher.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use mxsync_core::SyncResponse;
use mxsync_store::{MemoryStore, TransactionManager};
use mxsync_sync::{
    DispatchPhase, EventCategory, EventDispatcher, EventFilter, SubscriptionId, SyncError,
};

type Log = Arc<Mutex<Vec<String>>>;

fn full_response() -> SyncResponse {
    serde_json::from_value(json!({
        "next_batch": "s2",
        "device_lists": { "changed": ["@bob:example.org"] },
        "device_one_time_keys_count": { "signed_curve25519": 20 },
        "to_device": { "events": [
            { "type": "m.room_key", "sender": "@bob:example.org", "content": { "session_id": "S1" } },
            { "type": "m.room_key", "sender": "@bob:example.org", "content": { "session_id": "S2" } }
        ]},
        "account_data": { "events": [ { "type": "m.push_rules", "content": {} } ] },
        "presence": { "events": [ { "type": "m.presence", "sender": "@bob:example.org", "content": { "presence": "online" } } ] },
        "rooms": {
            "join": {
                "!a:example.org": {
                    "state": { "events": [ { "type": "m.room.name", "state_key": "", "content": { "name": "A" } } ] },
                    "timeline": { "events": [
                        { "type": "m.room.encrypted", "event_id": "$1", "content": { "session_id": "S1" } },
                        { "type": "m.room.message", "event_id": "$2", "content": { "body": "hi" } }
                    ]},
                    "ephemeral": { "events": [ { "type": "m.typing", "content": { "user_ids": [] } } ] },
                    "account_data": { "events": [ { "type": "m.fully_read", "content": { "event_id": "$2" } } ] }
                }
            },
            "invite": {
                "!b:example.org": {
                    "invite_state": { "events": [ { "type": "m.room.member", "state_key": "@me:example.org", "content": { "membership": "invite" } } ] }
                }
            },
            "leave": {
                "!c:example.org": {
                    "state": { "events": [ { "type": "m.room.member", "state_key": "@me:example.org", "content": { "membership": "leave" } } ] },
                    "timeline": { "events": [ { "type": "m.room.message", "event_id": "$9", "content": { "body": "bye" } } ] }
                }
            }
        }
    }))
    .unwrap()
}

fn label(category: EventCategory, event_type: &str, room: Option<&str>) -> String {
    match room {
        Some(room) => format!("{:?}:{}:{}", category, room, event_type),
        None => format!("{:?}:{}", category, event_type),
    }
}

fn position(log: &[String], prefix: &str) -> usize {
    log.iter()
        .position(|entry| entry.starts_with(prefix))
        .unwrap_or_else(|| panic!("{} not dispatched; log: {:?}", prefix, log))
}

fn last_position(log: &[String], prefix: &str) -> usize {
    log.iter()
        .rposition(|entry| entry.starts_with(prefix))
        .unwrap_or_else(|| panic!("{} not dispatched; log: {:?}", prefix, log))
}

fn record_everything(dispatcher: &EventDispatcher, log: &Log) {
    let registry = dispatcher.registry();

    let l = log.clone();
    registry.subscribe_device_lists(move |lists, _| {
        let l = l.clone();
        async move {
            l.lock().push(format!("device_lists:{}", lists.changed.len()));
            Ok(())
        }
    });
    let l = log.clone();
    registry.subscribe_one_time_keys(move |update, _| {
        let l = l.clone();
        async move {
            l.lock().push(format!("one_time_keys:{}", update.counts.len()));
            Ok(())
        }
    });
    let l = log.clone();
    registry.subscribe_events(EventFilter::all(), move |routed, _| {
        let l = l.clone();
        async move {
            let room = routed.room_id.as_ref().map(|r| r.as_str().to_string());
            l.lock()
                .push(label(routed.category, routed.event_type(), room.as_deref()));
            Ok(())
        }
    });
    let l = log.clone();
    registry.subscribe_raw_response(move |_, _| {
        let l = l.clone();
        async move {
            l.lock().push("raw".to_string());
            Ok(())
        }
    });
    let l = log.clone();
    registry.subscribe_after_response(move |_, _| {
        let l = l.clone();
        async move {
            l.lock().push("after".to_string());
            Ok(())
        }
    });
}

async fn dispatch(
    dispatcher: &EventDispatcher,
    response: SyncResponse,
) -> (Result<(), SyncError>, Vec<DispatchPhase>) {
    let manager = TransactionManager::new(Arc::new(MemoryStore::new()));
    let phases = Arc::new(Mutex::new(Vec::<DispatchPhase>::new()));
    let response = Arc::new(response);

    let result = {
        let phases = phases.clone();
        manager
            .write_transaction(|tx| async move {
                let on_phase = move |phase: DispatchPhase| phases.lock().push(phase);
                dispatcher.dispatch(response, &tx, &on_phase).await
            })
            .await
    };
    let phases = phases.lock().clone();
    (result, phases)
}

#[tokio::test]
async fn phases_run_in_order() {
    let dispatcher = EventDispatcher::new();
    let log = Log::default();
    record_everything(&dispatcher, &log);

    let (result, phases) = dispatch(&dispatcher, full_response()).await;
    result.unwrap();
    assert_eq!(
        phases,
        vec![
            DispatchPhase::Metadata,
            DispatchPhase::ToDevice,
            DispatchPhase::AccountData,
            DispatchPhase::RawResponse,
            DispatchPhase::Rooms,
            DispatchPhase::AfterResponse,
        ]
    );

    let log = log.lock().clone();
    let metadata = last_position(&log, "one_time_keys").max(last_position(&log, "device_lists"));
    let to_device_first = position(&log, "ToDevice:");
    let to_device_last = last_position(&log, "ToDevice:");
    let account = position(&log, "GlobalAccountData:");
    let raw = position(&log, "raw");
    let after = position(&log, "after");

    assert!(metadata < to_device_first);
    assert!(to_device_last < account);
    assert!(account < raw);
    for prefix in ["Presence:", "State:", "Timeline:", "Ephemeral:", "RoomAccountData:", "InviteState:"] {
        assert!(raw < position(&log, prefix), "{} before raw response", prefix);
        assert!(last_position(&log, prefix) < after, "{} after after-response", prefix);
    }
    assert_eq!(after, log.len() - 1);
}

#[tokio::test]
async fn joined_room_sections_are_sequential() {
    let dispatcher = EventDispatcher::new();
    let log = Log::default();
    record_everything(&dispatcher, &log);

    dispatch(&dispatcher, full_response()).await.0.unwrap();

    let log = log.lock().clone();
    let room = "!a:example.org";
    let state = position(&log, &format!("State:{}", room));
    let first_timeline = position(&log, &format!("Timeline:{}", room));
    let last_timeline = last_position(&log, &format!("Timeline:{}", room));
    let ephemeral = position(&log, &format!("Ephemeral:{}", room));
    let account = position(&log, &format!("RoomAccountData:{}", room));

    assert!(state < first_timeline);
    assert!(last_timeline < ephemeral);
    assert!(ephemeral < account);

    // Timeline order within the room is preserved.
    assert!(
        position(&log, &format!("Timeline:{}:m.room.encrypted", room))
            < position(&log, &format!("Timeline:{}:m.room.message", room))
    );

    // Left rooms get state before timeline too.
    let left = "!c:example.org";
    assert!(position(&log, &format!("State:{}", left)) < position(&log, &format!("Timeline:{}", left)));
}

#[tokio::test]
async fn subscribers_of_one_event_finish_before_the_next() {
    let dispatcher = EventDispatcher::new();
    let log = Log::default();

    for name in ["slow", "fast"] {
        let l = log.clone();
        dispatcher.registry().subscribe_events(
            EventFilter::all().in_category(EventCategory::ToDevice),
            move |routed, _| {
                let l = l.clone();
                async move {
                    if name == "slow" {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    let session = routed.event.content["session_id"].as_str().unwrap_or("?").to_string();
                    l.lock().push(format!("{}:{}", name, session));
                    Ok(())
                }
            },
        );
    }

    dispatch(&dispatcher, full_response()).await.0.unwrap();

    let log = log.lock().clone();
    assert_eq!(log.len(), 4);
    assert!(position(&log, "slow:S1") < position(&log, "fast:S2"));
    assert!(position(&log, "slow:S1") < position(&log, "slow:S2"));
}

#[tokio::test]
async fn failing_subscriber_skips_later_phases() {
    let dispatcher = EventDispatcher::new();
    let log = Log::default();
    record_everything(&dispatcher, &log);
    dispatcher.registry().subscribe_events(
        EventFilter::of_type("m.room_key"),
        |_, _| async { Err(anyhow::anyhow!("cannot store room key")) },
    );

    let (result, phases) = dispatch(&dispatcher, full_response()).await;

    assert!(matches!(result, Err(SyncError::Subscriber(_))));
    assert_eq!(phases, vec![DispatchPhase::Metadata]);
    let log = log.lock().clone();
    assert!(!log.iter().any(|e| e.starts_with("Timeline:") || e == "after" || e == "raw"));
}

#[tokio::test]
async fn unsubscribe_during_dispatch_applies_to_the_next_one() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let log = Log::default();
    let timeline_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();

    let l = log.clone();
    let id = dispatcher.registry().subscribe_events(
        EventFilter::all().in_category(EventCategory::Timeline),
        move |routed, _| {
            let l = l.clone();
            async move {
                l.lock().push(routed.event_type().to_string());
                Ok(())
            }
        },
    );
    *timeline_id.lock() = Some(id);

    let handle = Arc::clone(&dispatcher);
    let pending = timeline_id.clone();
    dispatcher.registry().subscribe_events(
        EventFilter::all().in_category(EventCategory::ToDevice),
        move |_, _| {
            let dispatcher = Arc::clone(&handle);
            let id = pending.lock().take();
            async move {
                if let Some(id) = id {
                    assert!(dispatcher.registry().unsubscribe(id));
                }
                Ok(())
            }
        },
    );

    dispatch(&dispatcher, full_response()).await.0.unwrap();
    assert_eq!(log.lock().len(), 3, "snapshot taken at dispatch start still commits");

    dispatch(&dispatcher, full_response()).await.0.unwrap();
    assert_eq!(log.lock().len(), 3);
}

#[tokio::test]
async fn empty_response_still_reports_every_phase() {
    let dispatcher = EventDispatcher::new();
    let log = Log::default();
    record_everything(&dispatcher, &log);

    let (result, phases) = dispatch(
        &dispatcher,
        SyncResponse {
            next_batch: "s1".into(),
            ..Default::default()
        },
    )
    .await;

    result.unwrap();
    assert_eq!(phases.len(), 6);
    assert_eq!(*log.lock(), vec!["raw".to_string(), "after".to_string()]);
}
