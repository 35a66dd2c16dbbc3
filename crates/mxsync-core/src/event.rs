//! Protocol events as they appear inside sync response sections.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{RoomId, UserId};

/// A single event from any sync response section.
///
/// One shape covers timeline, state, stripped state, ephemeral, account data,
/// presence and to-device events; fields a section does not carry are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    /// Event type, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event content; its schema depends on `event_type`.
    #[serde(default)]
    pub content: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Present on state events (may be the empty string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

impl ClientEvent {
    /// Create an event with only a type and content.
    pub fn new(event_type: impl Into<String>, content: Value) -> Self {
        Self {
            event_type: event_type.into(),
            content,
            sender: None,
            event_id: None,
            state_key: None,
            origin_server_ts: None,
            room_id: None,
        }
    }

    /// Set the sender.
    pub fn with_sender(mut self, sender: UserId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the event id.
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Set the state key, turning this into a state event.
    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    /// Whether this is a state event.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// Storage key for state events: `type|state_key`.
    pub fn state_slot(&self) -> Option<String> {
        self.state_key
            .as_ref()
            .map(|key| format!("{}|{}", self.event_type, key))
    }
}

/// The `{ "events": [...] }` wrapper used by most response sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<ClientEvent>,
}

impl EventList {
    /// Wrap a list of events.
    pub fn new(events: Vec<ClientEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_timeline_event() {
        let raw = json!({
            "type": "m.room.message",
            "event_id": "$abc",
            "sender": "@alice:example.org",
            "origin_server_ts": 1432735824653u64,
            "content": { "msgtype": "m.text", "body": "hello" }
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, "m.room.message");
        assert_eq!(event.event_id.as_deref(), Some("$abc"));
        assert!(!event.is_state());
        assert_eq!(event.content["body"], "hello");
    }

    #[test]
    fn test_state_slot() {
        let event = ClientEvent::new("m.room.member", json!({"membership": "join"}))
            .with_state_key("@alice:example.org");
        assert_eq!(
            event.state_slot().as_deref(),
            Some("m.room.member|@alice:example.org")
        );

        let empty_key = ClientEvent::new("m.room.name", json!({})).with_state_key("");
        assert_eq!(empty_key.state_slot().as_deref(), Some("m.room.name|"));
    }

    #[test]
    fn test_missing_content_defaults_to_null() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"m.typing"}"#).unwrap();
        assert!(event.content.is_null());
    }
}
