//! Segment Iterator
//!
//! Sequential iteration over a key range of one segment.

use std::sync::Arc;

use bytes::Bytes;

use crate::entry::Entry;
use crate::error::Result;

use super::reader::SegmentReader;

/// Iterator over segment entries in sorted key order
///
/// Owns an `Arc` of its reader, so it stays valid after the segment has been
/// superseded by a compaction.
pub struct SegmentIterator {
    reader: Arc<SegmentReader>,
    /// Current position in file
    current_offset: u64,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Exclusive upper key bound
    upper: Option<Bytes>,
    done: bool,
}

impl SegmentIterator {
    pub(super) fn new(
        reader: Arc<SegmentReader>,
        start_offset: u64,
        end_offset: u64,
        upper: Option<Bytes>,
    ) -> Self {
        Self {
            reader,
            current_offset: start_offset,
            end_offset,
            upper,
            done: false,
        }
    }
}

impl Iterator for SegmentIterator {
    /// Tombstones are yielded; the merge layer decides what they hide
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.current_offset >= self.end_offset {
            return None;
        }

        let (entry, next_offset) = match self.reader.read_entry_at(self.current_offset) {
            Ok(read) => read,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if let Some(upper) = &self.upper {
            if entry.key() >= upper {
                self.done = true;
                return None;
            }
        }

        self.current_offset = next_offset;
        Some(Ok(entry))
    }
}
