//! Persistence boundary
//!
//! The routing core never talks to a database directly. Message history and the
//! retry queue are mirrored into a `RecordStore`, a narrow CRUD interface the
//! host application implements over its storage engine. `MemoryRecordStore` is
//! the in-process implementation used by default and in tests.

use core::hash::Hash;
use hashbrown::HashMap;

use crate::errors::{MeshChatError, Result, StorageError};
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Record Traits
// ----------------------------------------------------------------------------

/// A value that can be kept in a `RecordStore`
pub trait Record: Clone + Send + 'static {
    type Key: Clone + Eq + Hash + core::fmt::Debug + Send;

    fn key(&self) -> Self::Key;

    /// Sort key for `all_sorted_by_timestamp`
    fn timestamp(&self) -> Timestamp;
}

/// CRUD-style record store provided by the host application
pub trait RecordStore<R: Record>: Send {
    /// Insert a new record, replacing any record with the same key
    fn insert(&mut self, record: R) -> Result<()>;

    /// Replace an existing record; fails with `NotFound` if the key is unknown
    fn update(&mut self, record: R) -> Result<()>;

    /// Delete a record, returning it if it existed
    fn delete(&mut self, key: &R::Key) -> Result<Option<R>>;

    fn get(&self, key: &R::Key) -> Result<Option<R>>;

    fn query(&self, predicate: &dyn Fn(&R) -> bool) -> Result<Vec<R>>;

    /// All records, oldest first
    fn all_sorted_by_timestamp(&self) -> Result<Vec<R>>;

    fn len(&self) -> Result<usize>;
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Record store backed by a hash map
#[derive(Debug)]
pub struct MemoryRecordStore<R: Record> {
    records: HashMap<R::Key, R>,
    fail_writes: bool,
}

impl<R: Record> MemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            records: HashMap::default(),
            fail_writes: false,
        }
    }

    /// Make every write fail, to exercise the non-fatal persistence paths
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(MeshChatError::storage("writes disabled"));
        }
        Ok(())
    }
}

impl<R: Record> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> for MemoryRecordStore<R> {
    fn insert(&mut self, record: R) -> Result<()> {
        self.check_writable()?;
        self.records.insert(record.key(), record);
        Ok(())
    }

    fn update(&mut self, record: R) -> Result<()> {
        self.check_writable()?;
        let key = record.key();
        match self.records.get_mut(&key) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                key: format!("{:?}", key),
            }
            .into()),
        }
    }

    fn delete(&mut self, key: &R::Key) -> Result<Option<R>> {
        self.check_writable()?;
        Ok(self.records.remove(key))
    }

    fn get(&self, key: &R::Key) -> Result<Option<R>> {
        Ok(self.records.get(key).cloned())
    }

    fn query(&self, predicate: &dyn Fn(&R) -> bool) -> Result<Vec<R>> {
        let mut matches: Vec<R> = self
            .records
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect();
        matches.sort_by_key(|record| record.timestamp());
        Ok(matches)
    }

    fn all_sorted_by_timestamp(&self) -> Result<Vec<R>> {
        self.query(&|_| true)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
