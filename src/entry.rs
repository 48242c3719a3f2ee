//! Entry definitions
//!
//! The key/value unit shared by every layer: memtables, segments, and the
//! merge iterator all speak `Entry`.

use bytes::Bytes;

/// Fixed per-entry overhead in a segment data block: KeyLen (4) + ValLen (4)
pub const ENTRY_HEADER_SIZE: usize = 8;

/// Value half of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A live value
    Live(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}

/// A single key with its value or tombstone
///
/// Ordering between entries is by key only; see [`Entry::cmp_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key: Bytes,
    value: Value,
}

impl Entry {
    /// Create a live entry
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Value::Live(value.into()),
        }
    }

    /// Create a tombstone for `key`
    pub fn tombstone(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Value::Tombstone,
        }
    }

    pub(crate) fn from_parts(key: Bytes, value: Value) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// The live value, or `None` for a tombstone
    pub fn value(&self) -> Option<&Bytes> {
        match &self.value {
            Value::Live(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    pub fn raw_value(&self) -> &Value {
        &self.value
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Value::Tombstone)
    }

    /// Compare two entries by key
    pub fn cmp_key(&self, other: &Entry) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }

    /// Approximate number of bytes this entry occupies in a segment data block
    pub fn encoded_len(&self) -> usize {
        let value_len = self.value().map_or(0, |v| v.len());
        ENTRY_HEADER_SIZE + self.key.len() + value_len
    }

    pub fn into_parts(self) -> (Bytes, Value) {
        (self.key, self.value)
    }
}
