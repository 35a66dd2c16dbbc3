//! The persisted mirror of sync state.
//!
//! Each function here writes through the cycle's [`Transaction`], so
//! everything one response changes commits together with its resume token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use mxsync_core::{
    ClientEvent, DeviceLists, Membership, RoomId, SyncResponse, UnreadNotificationsCount, UserId,
};
use mxsync_store::{MapRepository, Repository, Result, Transaction};
use mxsync_sync::{EventCategory, OneTimeKeysUpdate, RoutedEvent};

/// Summary of one room as last seen in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoom {
    pub room_id: RoomId,
    pub membership: Membership,
    /// Id of the newest timeline event seen.
    pub last_event_id: Option<String>,
    /// Pagination token for events before the stored timeline.
    pub prev_batch: Option<String>,
    pub unread_notifications: UnreadNotificationsCount,
    /// Number of timeline events stored so far.
    pub timeline_len: u64,
}

impl StoredRoom {
    fn new(room_id: RoomId, membership: Membership) -> Self {
        Self {
            room_id,
            membership,
            last_event_id: None,
            prev_batch: None,
            unread_notifications: UnreadNotificationsCount::default(),
            timeline_len: 0,
        }
    }
}

/// Last reported one-time key counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeKeyCounts {
    pub counts: BTreeMap<String, u64>,
    pub unused_fallback_key_types: Vec<String>,
}

pub(crate) const ROOMS: Repository<RoomId, StoredRoom> = Repository::new("rooms");
/// Current state per room, keyed by `type|state_key`.
pub(crate) const ROOM_STATE: MapRepository<RoomId, String, ClientEvent> =
    MapRepository::new("room_state");
/// Timeline per room, keyed by arrival index.
pub(crate) const TIMELINE: MapRepository<RoomId, u64, ClientEvent> = MapRepository::new("timeline");
pub(crate) const GLOBAL_ACCOUNT_DATA: Repository<String, ClientEvent> =
    Repository::new("global_account_data");
pub(crate) const ROOM_ACCOUNT_DATA: MapRepository<RoomId, String, ClientEvent> =
    MapRepository::new("room_account_data");
/// Users whose device keys must be re-fetched.
pub(crate) const OUTDATED_DEVICE_KEYS: Repository<UserId, bool> =
    Repository::new("outdated_device_keys");
pub(crate) const ONE_TIME_KEYS: Repository<String, OneTimeKeyCounts> =
    Repository::new("one_time_keys");

const ONE_TIME_KEYS_RECORD: &str = "own";

/// Upsert a [`StoredRoom`] for every room section of the response.
pub(crate) async fn save_rooms(tx: &Transaction, response: &SyncResponse) -> Result<()> {
    let rooms = &response.rooms;

    for (room_id, room) in &rooms.join {
        let mut stored = load_room(tx, room_id, Membership::Join).await?;
        stored.membership = Membership::Join;
        if let Some(counts) = room.unread_notifications {
            stored.unread_notifications = counts;
        }
        apply_timeline_markers(&mut stored, &room.timeline);
        ROOMS.save(tx, room_id, &stored).await?;
    }
    for room_id in rooms.invite.keys() {
        let mut stored = load_room(tx, room_id, Membership::Invite).await?;
        stored.membership = Membership::Invite;
        ROOMS.save(tx, room_id, &stored).await?;
    }
    for room_id in rooms.knock.keys() {
        let mut stored = load_room(tx, room_id, Membership::Knock).await?;
        stored.membership = Membership::Knock;
        ROOMS.save(tx, room_id, &stored).await?;
    }
    for (room_id, room) in &rooms.leave {
        let mut stored = load_room(tx, room_id, Membership::Leave).await?;
        stored.membership = Membership::Leave;
        apply_timeline_markers(&mut stored, &room.timeline);
        ROOMS.save(tx, room_id, &stored).await?;
    }

    trace!(
        joined = rooms.join.len(),
        invited = rooms.invite.len(),
        knocked = rooms.knock.len(),
        left = rooms.leave.len(),
        "rooms saved"
    );
    Ok(())
}

async fn load_room(tx: &Transaction, room_id: &RoomId, membership: Membership) -> Result<StoredRoom> {
    Ok(ROOMS
        .get(tx, room_id)
        .await?
        .unwrap_or_else(|| StoredRoom::new(room_id.clone(), membership)))
}

fn apply_timeline_markers(stored: &mut StoredRoom, timeline: &mxsync_core::Timeline) {
    if let Some(last) = timeline.events.iter().rev().find_map(|e| e.event_id.clone()) {
        stored.last_event_id = Some(last);
    }
    // A gap invalidates the old back-pagination point; otherwise keep the oldest.
    if timeline.limited || stored.prev_batch.is_none() {
        if let Some(prev_batch) = &timeline.prev_batch {
            stored.prev_batch = Some(prev_batch.clone());
        }
    }
}

/// Record a state event under its `(type, state_key)` slot.
pub(crate) async fn save_state_event(tx: &Transaction, routed: &RoutedEvent) -> Result<()> {
    let (Some(room_id), Some(slot)) = (&routed.room_id, routed.event.state_slot()) else {
        return Ok(());
    };
    ROOM_STATE.save(tx, room_id, &slot, &routed.event).await
}

/// Append a timeline event to its room.
pub(crate) async fn append_timeline_event(tx: &Transaction, routed: &RoutedEvent) -> Result<()> {
    let (Some(room_id), Some(membership)) = (&routed.room_id, routed.membership) else {
        return Ok(());
    };

    let mut stored = load_room(tx, room_id, membership).await?;
    TIMELINE.save(tx, room_id, &stored.timeline_len, &routed.event).await?;
    stored.timeline_len += 1;
    ROOMS.save(tx, room_id, &stored).await
}

/// Store an account data event, global or room-scoped.
pub(crate) async fn save_account_data(tx: &Transaction, routed: &RoutedEvent) -> Result<()> {
    let event_type = routed.event.event_type.clone();
    match (routed.category, &routed.room_id) {
        (EventCategory::RoomAccountData, Some(room_id)) => {
            ROOM_ACCOUNT_DATA
                .save(tx, room_id, &event_type, &routed.event)
                .await
        }
        (EventCategory::GlobalAccountData, _) => {
            GLOBAL_ACCOUNT_DATA.save(tx, &event_type, &routed.event).await
        }
        _ => Ok(()),
    }
}

/// Mark changed users outdated and forget users we no longer share a room with.
pub(crate) async fn save_device_lists(tx: &Transaction, lists: &DeviceLists) -> Result<()> {
    for user in &lists.changed {
        OUTDATED_DEVICE_KEYS.save(tx, user, &true).await?;
    }
    for user in &lists.left {
        OUTDATED_DEVICE_KEYS.delete(tx, user).await?;
    }
    Ok(())
}

pub(crate) async fn save_one_time_keys(tx: &Transaction, update: &OneTimeKeysUpdate) -> Result<()> {
    let key = ONE_TIME_KEYS_RECORD.to_string();
    let mut stored = ONE_TIME_KEYS.get(tx, &key).await?.unwrap_or_default();
    stored.counts = update.counts.clone();
    // Omitted fallback key types mean "unchanged".
    if let Some(types) = &update.unused_fallback_key_types {
        stored.unused_fallback_key_types = types.clone();
    }
    ONE_TIME_KEYS.save(tx, &key, &stored).await
}

pub(crate) async fn load_one_time_keys(tx: &Transaction) -> Result<Option<OneTimeKeyCounts>> {
    ONE_TIME_KEYS.get(tx, &ONE_TIME_KEYS_RECORD.to_string()).await
}
