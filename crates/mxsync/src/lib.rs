//! # mxsync
//!
//! A Matrix-style client sync core: a long-poll loop that keeps a local
//! mirror of server state up to date, delivering every change to
//! subscribers in a fixed order and committing each batch atomically.
//!
//! ## Overview
//!
//! - **Transactions**: every cycle's writes and its resume token commit
//!   together or not at all
//! - **Ordering**: key material (to-device events) is always handled before
//!   the room timeline that depends on it
//! - **Lifecycle**: the loop's state is observable and it can be started,
//!   run once, stopped or cancelled at any time
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mxsync::{ClientConfig, SyncClient};
//! use mxsync::store::MemoryStore;
//! use mxsync::sync::memory::ScriptedSyncApi;
//! use mxsync::sync::EventFilter;
//!
//! async fn example() -> mxsync::Result<()> {
//!     let client = SyncClient::new(
//!         Arc::new(ScriptedSyncApi::new()),
//!         Arc::new(MemoryStore::new()),
//!         ClientConfig::default(),
//!     );
//!
//!     client
//!         .subscribers()
//!         .subscribe_events(EventFilter::of_type("m.room.message"), |event, _ctx| async move {
//!             println!("new message in {:?}", event.room_id);
//!             Ok(())
//!         });
//!
//!     client.start(false).await?;
//!     // ...
//!     client.stop(true).await;
//!
//!     for room in client.rooms().await? {
//!         println!("{} ({:?})", room.room_id, room.membership);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `mxsync::core` - Identifiers, sync state and the response model
//! - `mxsync::store` - Transaction manager and repositories
//! - `mxsync::sync` - Sync loop, dispatcher and transport trait

pub mod client;
pub mod error;
pub mod mirror;

// Re-export component crates
pub use mxsync_core as core;
pub use mxsync_store as store;
pub use mxsync_sync as sync;

// Re-export main types
pub use client::{ClientConfig, SyncClient};
pub use error::{ClientError, Result};
pub use mirror::{OneTimeKeyCounts, StoredRoom};
