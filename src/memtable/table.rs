//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::entry::{Entry, Value};

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<BTreeMap<Bytes, Value>>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get the entry stored for `key`, tombstones included (read lock)
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let data = self.data.read();
        data.get_key_value(key)
            .map(|(k, v)| Entry::from_parts(k.clone(), v.clone()))
    }

    /// Insert or replace an entry (write lock)
    pub fn insert(&self, entry: Entry) {
        let (key, value) = entry.into_parts();
        self.data.write().insert(key, value);
    }

    /// Put a key-value pair
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.insert(Entry::new(key, value));
    }

    /// Delete a key (inserts tombstone)
    pub fn delete(&self, key: impl Into<Bytes>) {
        self.insert(Entry::tombstone(key));
    }

    /// Snapshot of the entries in the half-open range `[from, to)`, sorted
    /// by key. Either bound may be omitted.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Vec<Entry> {
        if let (Some(f), Some(t)) = (from, to) {
            if f >= t {
                return Vec::new();
            }
        }

        let lower = from.map_or(Bound::Unbounded, Bound::Included);
        let upper = to.map_or(Bound::Unbounded, Bound::Excluded);

        let data = self.data.read();
        data.range::<[u8], _>((lower, upper))
            .map(|(k, v)| Entry::from_parts(k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of every entry in key order
    pub fn entries(&self) -> Vec<Entry> {
        self.range(None, None)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("entries", &self.entry_count())
            .finish()
    }
}
