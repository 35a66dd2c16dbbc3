//! # mxsync Testkit
//!
//! Testing utilities for mxsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A fluent [`ResponseBuilder`] plus ready-made events
//! - **Recorder**: An [`EventRecorder`] that subscribes to every hook and logs deliveries in order
//! - **Generators**: Proptest strategies for whole sync responses
//!
//! ## Test Fixtures
//!
//! ```rust
//! use mxsync_testkit::fixtures::{message, room_id, ResponseBuilder};
//!
//! let room = room_id("lobby");
//! let response = ResponseBuilder::new("s1")
//!     .joined_timeline(&room, message("$1", "hello"))
//!     .build();
//! assert_eq!(response.event_count(), 1);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use mxsync_testkit::generators::sync_response;
//!
//! proptest! {
//!     #[test]
//!     fn token_matches_batch(response in sync_response()) {
//!         prop_assert_eq!(response.next_token().as_str(), response.next_batch.as_str());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    encrypted, member, message, room_id, room_key, state, user_id, Delivery, EventRecorder,
    ResponseBuilder,
};
pub use generators::sync_response;
