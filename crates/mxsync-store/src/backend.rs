//! Backend trait: the abstract interface a storage engine implements.
//!
//! The transaction manager only ever talks to storage through this trait.
//! A backend sees reads as they happen and writes as whole write sets at
//! commit time.

use std::collections::btree_map::{self, BTreeMap};

use async_trait::async_trait;

use crate::error::Result;

/// Address of a record: repository table, primary key, optional secondary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub table: String,
    pub primary: String,
    pub secondary: Option<String>,
}

impl RecordKey {
    /// Key of a record in a single-key repository.
    pub fn new(table: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary: primary.into(),
            secondary: None,
        }
    }

    /// Key of a record in a partitioned (two-key) repository.
    pub fn with_secondary(
        table: impl Into<String>,
        primary: impl Into<String>,
        secondary: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            primary: primary.into(),
            secondary: Some(secondary.into()),
        }
    }

    /// Whether this key belongs to `table`, and to `primary` if given.
    pub fn matches(&self, table: &str, primary: Option<&str>) -> bool {
        self.table == table && primary.map_or(true, |p| self.primary == p)
    }
}

/// A buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>),
    Delete,
}

/// The buffered writes of one transaction, last write per key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    ops: BTreeMap<RecordKey, WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: RecordKey, value: Vec<u8>) {
        self.ops.insert(key, WriteOp::Put(value));
    }

    pub fn delete(&mut self, key: RecordKey) {
        self.ops.insert(key, WriteOp::Delete);
    }

    pub fn get(&self, key: &RecordKey) -> Option<&WriteOp> {
        self.ops.get(key)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, RecordKey, WriteOp> {
        self.ops.iter()
    }

    /// Buffered ops for records of `table` (and `primary` if given).
    pub fn matching<'a>(
        &'a self,
        table: &'a str,
        primary: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a RecordKey, &'a WriteOp)> + 'a {
        self.ops
            .iter()
            .filter(move |(key, _)| key.matches(table, primary))
    }
}

impl IntoIterator for WriteSet {
    type Item = (RecordKey, WriteOp);
    type IntoIter = btree_map::IntoIter<RecordKey, WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// The backend trait: async interface to a storage engine.
///
/// # Contract
///
/// - `apply` installs a whole write set atomically: a concurrent reader sees
///   either none or all of it.
/// - No method may hold a lock across an `.await`, and no method may wait on
///   another transaction. The manager relies on this to let unrelated
///   transactions run concurrently.
/// - Engine failures are reported as `StoreError::Backend` and abort the
///   transaction that observed them.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Read one committed record.
    async fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>>;

    /// All committed records of one partition (`table`, `primary`).
    async fn scan(&self, table: &str, primary: &str) -> Result<Vec<(RecordKey, Vec<u8>)>>;

    /// All committed records of a table.
    async fn scan_table(&self, table: &str) -> Result<Vec<(RecordKey, Vec<u8>)>>;

    /// Atomically apply a committed write set.
    async fn apply(&self, writes: WriteSet) -> Result<()>;
}
