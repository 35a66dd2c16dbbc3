//! # mxsync Store
//!
//! Transactional persistence contract for the mxsync sync core. Provides a
//! [`TransactionManager`] that scopes units of work over a pluggable
//! [`StoreBackend`], plus typed repositories that can only be used from
//! inside a transaction.
//!
//! ## Key Types
//!
//! - [`TransactionManager`] - Opens read and write transactions
//! - [`Transaction`] - Explicit handle threaded through nested work
//! - [`StoreBackend`] - The async trait a storage engine implements
//! - [`Repository`], [`MapRepository`] - Typed record access
//! - [`MemoryStore`] - In-memory backend for tests and ephemeral clients
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mxsync_store::{MemoryStore, Repository, StoreError, TransactionManager};
//!
//! async fn example() -> Result<(), StoreError> {
//!     let manager = TransactionManager::new(Arc::new(MemoryStore::new()));
//!     let names: Repository<String, String> = Repository::new("names");
//!
//!     manager
//!         .write_transaction(|tx| async move {
//!             names.save(&tx, &"alice".to_string(), &"Alice".to_string()).await?;
//!             // Nested scopes reuse the enclosing transaction.
//!             tx.write_transaction(|tx| async move {
//!                 names.save(&tx, &"bob".to_string(), &"Bob".to_string()).await
//!             })
//!             .await
//!         })
//!         .await?;
//!
//!     let bob = manager
//!         .read_transaction(|tx| async move { names.get(&tx, &"bob".to_string()).await })
//!         .await?;
//!     assert_eq!(bob.as_deref(), Some("Bob"));
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **No global exclusion**: the manager holds no lock while a body runs.
//!   Isolation beyond read-your-writes is up to the backend.
//! - **Buffered writes**: writes land in the outermost transaction's overlay
//!   and reach the backend in a single atomic `apply` on commit.
//! - **Abort by dropping**: an error, a panic or a cancelled future all leave
//!   the overlay unapplied.

pub mod backend;
pub mod codec;
pub mod error;
pub mod memory;
pub mod repository;
pub mod transaction;

pub use backend::{RecordKey, StoreBackend, WriteOp, WriteSet};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use repository::{MapRepository, RecordKeyPart, Repository};
pub use transaction::{Transaction, TransactionKind, TransactionManager};
