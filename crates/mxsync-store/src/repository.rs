//! Typed repositories over the raw record space.
//!
//! Every method takes a `&Transaction`, so repository access outside a
//! transaction scope does not compile. Writes follow last-write-wins; there
//! is no optimistic-concurrency token.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mxsync_core::{RoomId, UserId};

use crate::backend::RecordKey;
use crate::codec::{decode, encode};
use crate::error::{Result, StoreError};
use crate::transaction::Transaction;

/// A key component that can be stored as a string.
pub trait RecordKeyPart: Sized {
    fn to_key_part(&self) -> String;
    fn from_key_part(part: &str) -> Result<Self>;
}

impl RecordKeyPart for String {
    fn to_key_part(&self) -> String {
        self.clone()
    }

    fn from_key_part(part: &str) -> Result<Self> {
        Ok(part.to_string())
    }
}

impl RecordKeyPart for u64 {
    fn to_key_part(&self) -> String {
        // Zero-padded so lexical order matches numeric order.
        format!("{:020}", self)
    }

    fn from_key_part(part: &str) -> Result<Self> {
        part.parse()
            .map_err(|_| StoreError::InvalidKey(part.to_string()))
    }
}

impl RecordKeyPart for RoomId {
    fn to_key_part(&self) -> String {
        self.as_str().to_string()
    }

    fn from_key_part(part: &str) -> Result<Self> {
        RoomId::parse(part).map_err(|e| StoreError::InvalidKey(e.to_string()))
    }
}

impl RecordKeyPart for UserId {
    fn to_key_part(&self) -> String {
        self.as_str().to_string()
    }

    fn from_key_part(part: &str) -> Result<Self> {
        UserId::parse(part).map_err(|e| StoreError::InvalidKey(e.to_string()))
    }
}

/// Records addressed by a single key.
pub struct Repository<K, V> {
    table: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Repository<K, V> {
    pub const fn new(table: &'static str) -> Self {
        Self {
            table,
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

impl<K, V> Clone for Repository<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Repository<K, V> {}

impl<K, V> fmt::Debug for Repository<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Repository").field(&self.table).finish()
    }
}

impl<K, V> Repository<K, V>
where
    K: RecordKeyPart,
    V: Serialize + DeserializeOwned,
{
    fn key(&self, key: &K) -> RecordKey {
        RecordKey::new(self.table, key.to_key_part())
    }

    pub async fn get(&self, tx: &Transaction, key: &K) -> Result<Option<V>> {
        match tx.get_raw(&self.key(key)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, tx: &Transaction, key: &K, value: &V) -> Result<()> {
        tx.put_raw(self.key(key), encode(value)?)
    }

    pub async fn delete(&self, tx: &Transaction, key: &K) -> Result<()> {
        tx.delete_raw(self.key(key))
    }

    /// Every record of the repository, in key order.
    pub async fn get_all(&self, tx: &Transaction) -> Result<Vec<(K, V)>> {
        tx.scan_table_raw(self.table)
            .await?
            .into_iter()
            .filter(|(key, _)| key.secondary.is_none())
            .map(|(key, bytes)| -> Result<(K, V)> {
                Ok((K::from_key_part(&key.primary)?, decode(&bytes)?))
            })
            .collect()
    }
}

/// Records addressed by a primary (partition) key and a secondary key.
pub struct MapRepository<K, S, V> {
    table: &'static str,
    _marker: PhantomData<fn() -> (K, S, V)>,
}

impl<K, S, V> MapRepository<K, S, V> {
    pub const fn new(table: &'static str) -> Self {
        Self {
            table,
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }
}

impl<K, S, V> Clone for MapRepository<K, S, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, S, V> Copy for MapRepository<K, S, V> {}

impl<K, S, V> fmt::Debug for MapRepository<K, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapRepository").field(&self.table).finish()
    }
}

impl<K, S, V> MapRepository<K, S, V>
where
    K: RecordKeyPart,
    S: RecordKeyPart + Ord,
    V: Serialize + DeserializeOwned,
{
    fn key(&self, primary: &K, secondary: &S) -> RecordKey {
        RecordKey::with_secondary(self.table, primary.to_key_part(), secondary.to_key_part())
    }

    /// All entries of one partition, keyed by secondary key.
    pub async fn get(&self, tx: &Transaction, primary: &K) -> Result<BTreeMap<S, V>> {
        tx.scan_raw(self.table, &primary.to_key_part())
            .await?
            .into_iter()
            .filter_map(|(key, bytes)| key.secondary.map(|secondary| (secondary, bytes)))
            .map(|(secondary, bytes)| -> Result<(S, V)> {
                Ok((S::from_key_part(&secondary)?, decode(&bytes)?))
            })
            .collect()
    }

    pub async fn get_entry(&self, tx: &Transaction, primary: &K, secondary: &S) -> Result<Option<V>> {
        match tx.get_raw(&self.key(primary, secondary)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, tx: &Transaction, primary: &K, secondary: &S, value: &V) -> Result<()> {
        tx.put_raw(self.key(primary, secondary), encode(value)?)
    }

    pub async fn delete(&self, tx: &Transaction, primary: &K, secondary: &S) -> Result<()> {
        tx.delete_raw(self.key(primary, secondary))
    }

    /// Delete every entry of one partition.
    pub async fn delete_by_partition(&self, tx: &Transaction, primary: &K) -> Result<()> {
        for (key, _) in tx.scan_raw(self.table, &primary.to_key_part()).await? {
            tx.delete_raw(key)?;
        }
        Ok(())
    }

    /// Every entry of the repository as `(primary, secondary, value)`.
    pub async fn get_all(&self, tx: &Transaction) -> Result<Vec<(K, S, V)>> {
        tx.scan_table_raw(self.table)
            .await?
            .into_iter()
            .filter_map(|(key, bytes)| key.secondary.map(|s| (key.primary, s, bytes)))
            .map(|(primary, secondary, bytes)| -> Result<(K, S, V)> {
                Ok((
                    K::from_key_part(&primary)?,
                    S::from_key_part(&secondary)?,
                    decode(&bytes)?,
                ))
            })
            .collect()
    }
}
