//! Transaction manager: scoped, nestable units of work.
//!
//! A transaction is opened with [`TransactionManager::read_transaction`] or
//! [`TransactionManager::write_transaction`]. The body receives a
//! [`Transaction`] handle; nested scopes are opened on that handle and run
//! the body immediately in the same context.
//!
//! Writes are buffered in the outermost transaction and applied to the
//! backend in one call when the body returns `Ok`. If the body returns `Err`,
//! panics, or its future is dropped, the buffer is discarded.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::backend::{RecordKey, StoreBackend, WriteOp, WriteSet};
use crate::error::{Result, StoreError};

/// Kind of the outermost scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

/// Opens transactions over a backend.
///
/// Cloning is cheap; all clones share the backend.
#[derive(Clone)]
pub struct TransactionManager {
    backend: Arc<dyn StoreBackend>,
    next_id: Arc<AtomicU64>,
}

impl TransactionManager {
    /// Create a manager over a backend.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The backend this manager writes to.
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Run `body` in a new write transaction.
    ///
    /// Returns the body's result, or its error unchanged. A failing commit is
    /// reported as `E::from(StoreError)`.
    pub async fn write_transaction<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        self.run(TransactionKind::Write, body).await
    }

    /// Run `body` in a new read transaction.
    ///
    /// Reads never wait on writers. Writes reached through a nested write
    /// scope are committed with this transaction.
    pub async fn read_transaction<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        self.run(TransactionKind::Read, body).await
    }

    async fn run<T, E, F, Fut>(&self, kind: TransactionKind, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        let tx = Transaction::begin(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            Arc::clone(&self.backend),
        );
        trace!(txn = tx.id(), ?kind, "transaction begin");

        // Aborts on every exit path that does not reach `commit`; a no-op
        // once the transaction is closed.
        let _guard = AbortOnDrop(tx.clone());
        let value = body(tx.clone()).await?;
        tx.commit().await?;
        Ok(value)
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct AbortOnDrop(Transaction);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct TxnState {
    closed: bool,
    writes: WriteSet,
}

struct TxnInner {
    id: u64,
    kind: TransactionKind,
    backend: Arc<dyn StoreBackend>,
    state: Mutex<TxnState>,
}

/// Handle to an open transaction.
///
/// The handle is `Clone + Send + 'static`, so a body may hand clones to
/// spawned sub-work. Using a handle after its transaction finished fails
/// with [`StoreError::TransactionClosed`].
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

impl Transaction {
    fn begin(id: u64, kind: TransactionKind, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id,
                kind,
                backend,
                state: Mutex::new(TxnState {
                    closed: false,
                    writes: WriteSet::new(),
                }),
            }),
        }
    }

    /// Identifier of the outermost transaction, unique per manager.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Kind of the outermost scope.
    pub fn kind(&self) -> TransactionKind {
        self.inner.kind
    }

    /// Whether the transaction already committed or aborted.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.inner.state.lock().writes.len()
    }

    /// Open a nested write scope. Runs `body` immediately in this context.
    pub async fn write_transaction<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        self.ensure_open()?;
        body(self.clone()).await
    }

    /// Open a nested read scope. Runs `body` immediately in this context.
    pub async fn read_transaction<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        self.ensure_open()?;
        body(self.clone()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Raw record access
    // ─────────────────────────────────────────────────────────────────────────

    /// Read a record, seeing this transaction's own writes first.
    pub async fn get_raw(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        {
            let state = self.inner.state.lock();
            if state.closed {
                return Err(StoreError::TransactionClosed(self.inner.id));
            }
            match state.writes.get(key) {
                Some(WriteOp::Put(bytes)) => return Ok(Some(bytes.clone())),
                Some(WriteOp::Delete) => return Ok(None),
                None => {}
            }
        }
        self.inner.backend.get(key).await
    }

    /// All records of a partition, merged with buffered writes.
    pub async fn scan_raw(&self, table: &str, primary: &str) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        self.ensure_open()?;
        let committed = self.inner.backend.scan(table, primary).await?;
        Ok(self.merge(committed, table, Some(primary)))
    }

    /// All records of a table, merged with buffered writes.
    pub async fn scan_table_raw(&self, table: &str) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        self.ensure_open()?;
        let committed = self.inner.backend.scan_table(table).await?;
        Ok(self.merge(committed, table, None))
    }

    /// Buffer a write.
    pub fn put_raw(&self, key: RecordKey, value: Vec<u8>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(StoreError::TransactionClosed(self.inner.id));
        }
        state.writes.put(key, value);
        Ok(())
    }

    /// Buffer a delete.
    pub fn delete_raw(&self, key: RecordKey) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(StoreError::TransactionClosed(self.inner.id));
        }
        state.writes.delete(key);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(StoreError::TransactionClosed(self.inner.id))
        } else {
            Ok(())
        }
    }

    fn merge(
        &self,
        committed: Vec<(RecordKey, Vec<u8>)>,
        table: &str,
        primary: Option<&str>,
    ) -> Vec<(RecordKey, Vec<u8>)> {
        let mut merged: BTreeMap<RecordKey, Vec<u8>> = committed.into_iter().collect();
        let state = self.inner.state.lock();
        for (key, op) in state.writes.matching(table, primary) {
            match op {
                WriteOp::Put(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                WriteOp::Delete => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    async fn commit(&self) -> Result<()> {
        let writes = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(StoreError::TransactionClosed(self.inner.id));
            }
            state.closed = true;
            std::mem::take(&mut state.writes)
        };

        let count = writes.len();
        if !writes.is_empty() {
            self.inner.backend.apply(writes).await?;
        }
        trace!(txn = self.inner.id, writes = count, "transaction commit");
        Ok(())
    }

    fn abort(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let discarded = std::mem::take(&mut state.writes).len();
        trace!(txn = self.inner.id, discarded, "transaction abort");
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}
