//! The decoded `/sync` response.
//!
//! Only the sections that drive dispatch ordering are modeled. Every section
//! is optional on the wire and defaults to empty here, so a sparse response
//! decodes without special casing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{ClientEvent, EventList};
use crate::types::{ResumeToken, RoomId, UserId};

/// One batch of changes returned by the long-poll endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Token to resume from on the next request.
    pub next_batch: String,

    #[serde(default)]
    pub device_lists: DeviceLists,

    /// Unclaimed one-time keys per algorithm.
    #[serde(default)]
    pub device_one_time_keys_count: BTreeMap<String, u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_unused_fallback_key_types: Option<Vec<String>>,

    #[serde(default)]
    pub to_device: EventList,

    /// Global account data.
    #[serde(default)]
    pub account_data: EventList,

    #[serde(default)]
    pub presence: EventList,

    #[serde(default)]
    pub rooms: Rooms,
}

impl SyncResponse {
    /// Decode a response body.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// The resume token carried by this response.
    pub fn next_token(&self) -> ResumeToken {
        ResumeToken::new(self.next_batch.clone())
    }

    /// Whether the response carries any device-list change.
    pub fn has_device_list_changes(&self) -> bool {
        !self.device_lists.changed.is_empty() || !self.device_lists.left.is_empty()
    }

    /// Total number of events across all sections.
    pub fn event_count(&self) -> usize {
        let global =
            self.to_device.events.len() + self.account_data.events.len() + self.presence.events.len();
        global + self.rooms.event_count()
    }
}

/// Users whose device lists changed, or with whom we no longer share a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceLists {
    #[serde(default)]
    pub changed: Vec<UserId>,
    #[serde(default)]
    pub left: Vec<UserId>,
}

/// Per-membership room sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: BTreeMap<RoomId, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<RoomId, InvitedRoom>,
    #[serde(default)]
    pub knock: BTreeMap<RoomId, KnockedRoom>,
    #[serde(default)]
    pub leave: BTreeMap<RoomId, LeftRoom>,
}

impl Rooms {
    pub fn is_empty(&self) -> bool {
        self.join.is_empty()
            && self.invite.is_empty()
            && self.knock.is_empty()
            && self.leave.is_empty()
    }

    fn event_count(&self) -> usize {
        let joined: usize = self
            .join
            .values()
            .map(|room| {
                room.state.events.len()
                    + room.timeline.events.len()
                    + room.ephemeral.events.len()
                    + room.account_data.events.len()
            })
            .sum();
        let invited: usize = self.invite.values().map(|r| r.invite_state.events.len()).sum();
        let knocked: usize = self.knock.values().map(|r| r.knock_state.events.len()).sum();
        let left: usize = self
            .leave
            .values()
            .map(|room| {
                room.state.events.len() + room.timeline.events.len() + room.account_data.events.len()
            })
            .sum();
        joined + invited + knocked + left
    }
}

/// Timeline slice of a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<ClientEvent>,
    /// The server dropped events between the previous batch and this one.
    #[serde(default)]
    pub limited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

/// Notification counters of a joined room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadNotificationsCount {
    #[serde(default)]
    pub highlight_count: u64,
    #[serde(default)]
    pub notification_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
    /// Typing notifications, read receipts.
    #[serde(default)]
    pub ephemeral: EventList,
    #[serde(default)]
    pub account_data: EventList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_notifications: Option<UnreadNotificationsCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnockedRoom {
    #[serde(default)]
    pub knock_state: EventList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeftRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub account_data: EventList,
}
