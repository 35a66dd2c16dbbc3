//! # mxsync Sync
//!
//! The long-poll sync loop and the ordered dispatch of each response to
//! subscribers.
//!
//! ## Overview
//!
//! A [`SyncLoop`] repeatedly asks a [`SyncApi`] for the next batch of
//! changes. Each batch is handed to an [`EventDispatcher`], which calls the
//! registered subscribers in a fixed phase order, and the new resume token is
//! saved. Dispatch and token save share one write transaction: if any
//! subscriber fails, nothing of that cycle is committed and the same batch is
//! requested again.
//!
//! ## Key Properties
//!
//! - **Ordered**: to-device events are always delivered before any timeline
//!   event of the same batch
//! - **Atomic**: a cycle commits entirely or not at all
//! - **Resumable**: the token only advances after a successful commit
//! - **Observable**: lifecycle state and token are exposed as watch channels
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mxsync_store::{MemoryStore, TransactionManager};
//! use mxsync_sync::memory::ScriptedSyncApi;
//! use mxsync_sync::{EventDispatcher, EventFilter, RepositoryTokenStore, SyncConfig, SyncLoop};
//!
//! async fn example() -> mxsync_sync::Result<()> {
//!     let dispatcher = Arc::new(EventDispatcher::new());
//!     dispatcher
//!         .registry()
//!         .subscribe_events(EventFilter::of_type("m.room.message"), |event, _ctx| async move {
//!             println!("{:?}", event.event.content);
//!             Ok(())
//!         });
//!
//!     let sync = SyncLoop::new(
//!         Arc::new(ScriptedSyncApi::new()),
//!         dispatcher,
//!         TransactionManager::new(Arc::new(MemoryStore::new())),
//!         Arc::new(RepositoryTokenStore::new()),
//!         SyncConfig::default(),
//!     );
//!
//!     sync.start(false).await?;
//!     // ...
//!     sync.stop(true).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod subscriber;
pub mod sync_loop;
pub mod token;
pub mod transport;

pub use config::{SyncConfig, MAX_RETRY_DELAY};
pub use dispatcher::{DispatchPhase, EventDispatcher};
pub use error::{Result, SyncError, TransportError};
pub use subscriber::{
    DispatchContext, EventCategory, EventFilter, OneTimeKeysUpdate, RoutedEvent,
    SubscriberRegistry, SubscriberResult, SubscriptionId,
};
pub use sync_loop::SyncLoop;
pub use token::{RepositoryTokenStore, ResumeTokenStore};
pub use transport::{memory, SyncApi, SyncRequest};
