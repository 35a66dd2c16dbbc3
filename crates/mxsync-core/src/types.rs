//! Strong type definitions for mxsync.
//!
//! Identifiers are newtypes so a room id can never be passed where a user id
//! is expected. Both are validated on construction and on deserialization.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Checks the common `<sigil>localpart:server` shape of Matrix identifiers.
fn validate_id(value: &str, sigil: char, kind: &'static str) -> Result<()> {
    let valid = value.starts_with(sigil)
        && value
            .find(':')
            .map(|idx| idx > 1 && idx + 1 < value.len())
            .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidId {
            kind,
            value: value.to_string(),
        })
    }
}

/// A room identifier, e.g. `!abc:example.org`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Parse and validate a room id.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_id(&value, '!', "room")?;
        Ok(Self(value))
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A user identifier, e.g. `@alice:example.org`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse and validate a user id.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_id(&value, '@', "user")?;
        Ok(Self(value))
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! id_impls {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self> {
                Self::parse(value)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = CoreError;

            fn try_from(value: &str) -> Result<Self> {
                Self::parse(value)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_impls!(RoomId);
id_impls!(UserId);

/// Opaque cursor returned as `next_batch` by the server.
///
/// The absence of a token (`Option::None` wherever one is stored) means the
/// client never completed a sync and the next request is an initial sync.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Wrap a server-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({})", self.0)
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResumeToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Membership of the local user in a room, derived from the response section
/// the room appeared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Join,
    Invite,
    Knock,
    Leave,
}

/// Presence value sent with the sync request (`set_presence`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Offline,
    Unavailable,
}

impl PresenceState {
    /// Query-string form of the presence value.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Offline => "offline",
            PresenceState::Unavailable => "unavailable",
        }
    }
}
