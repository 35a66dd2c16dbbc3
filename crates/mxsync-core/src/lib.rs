//! # mxsync Core
//!
//! Pure data model for the mxsync client synchronization core: identifiers,
//! the sync lifecycle state, resume tokens and the decoded `/sync` response.
//!
//! This crate contains no I/O, no storage and no networking.
//!
//! ## Key Types
//!
//! - [`SyncResponse`] - One decoded batch from the long-poll endpoint
//! - [`ClientEvent`] - A single protocol event inside a response section
//! - [`SyncState`] - Observable lifecycle state of the sync loop
//! - [`ResumeToken`] - Opaque cursor marking how far the client has applied
//! - [`RoomId`], [`UserId`] - Validated identifier newtypes

pub mod error;
pub mod event;
pub mod response;
pub mod state;
pub mod types;

pub use error::{CoreError, Result};
pub use event::{ClientEvent, EventList};
pub use response::{
    DeviceLists, InvitedRoom, JoinedRoom, KnockedRoom, LeftRoom, Rooms, SyncResponse, Timeline,
    UnreadNotificationsCount,
};
pub use state::SyncState;
pub use types::{Membership, PresenceState, ResumeToken, RoomId, UserId};
