//! In-memory implementation of the StoreBackend trait.
//!
//! This is primarily for testing and ephemeral clients. Everything is lost
//! when the store is dropped. The lock is only ever held for the duration
//! of a synchronous map operation, never across an await.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::{RecordKey, StoreBackend, WriteOp, WriteSet};
use crate::error::{Result, StoreError};

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordKey, Vec<u8>>>,
    fail_next_apply: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of write sets applied so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next `apply` fail with [`StoreError::InjectedFailure`].
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    fn collect(&self, table: &str, primary: Option<&str>) -> Vec<(RecordKey, Vec<u8>)> {
        let records = self.records.read();
        let start = RecordKey {
            table: table.to_string(),
            primary: primary.unwrap_or_default().to_string(),
            secondary: None,
        };
        records
            .range(start..)
            .take_while(|(key, _)| key.matches(table, primary))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn scan(&self, table: &str, primary: &str) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        Ok(self.collect(table, Some(primary)))
    }

    async fn scan_table(&self, table: &str) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        Ok(self.collect(table, None))
    }

    async fn apply(&self, writes: WriteSet) -> Result<()> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::InjectedFailure);
        }

        let mut records = self.records.write();
        for (key, op) in writes {
            match op {
                WriteOp::Put(value) => {
                    records.insert(key, value);
                }
                WriteOp::Delete => {
                    records.remove(&key);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
