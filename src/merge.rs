//! Merge Iterator
//!
//! K-way merge of sorted entry sources into one sorted, deduplicated,
//! tombstone-free stream.
//!
//! ## Precedence
//! Every source carries a rank; a higher rank is a more recent source. When
//! several sources hold the same key, the entry from the highest-ranked source
//! wins and the others are discarded. A winning tombstone suppresses the key
//! entirely: older values are dropped and the tombstone itself is never
//! yielded.
//!
//! ## Algorithm
//! A max-heap of cursors ordered by (key ascending, rank descending). Each
//! step pops the smallest key, drains every other cursor positioned on the same
//! key, advances all of them, and yields the winner unless it is a tombstone.
//!
//! The iterator is pull-based and single-use: build a fresh one per read.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;
use crate::error::Result;

/// Boxed, fallible stream of entries sorted by key with no duplicate keys
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Entry>> + Send + 'a>;

/// One sorted input of a merge, tagged with its precedence rank
pub struct MergeSource<'a> {
    pub rank: usize,
    pub iter: EntryIter<'a>,
}

impl<'a> MergeSource<'a> {
    pub fn new(rank: usize, iter: EntryIter<'a>) -> Self {
        Self { rank, iter }
    }

    /// Source over an in-memory snapshot (e.g. a memtable range)
    pub fn from_entries(rank: usize, entries: Vec<Entry>) -> Self {
        Self::new(rank, Box::new(entries.into_iter().map(Ok)))
    }
}

/// A source positioned on its current entry
struct Cursor<'a> {
    current: Entry,
    rank: usize,
    rest: EntryIter<'a>,
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.current.key() == other.current.key() && self.rank == other.rank
    }
}

impl Eq for Cursor<'_> {}

impl PartialOrd for Cursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor<'_> {
    // BinaryHeap is a max-heap: the smallest key, then the highest rank, pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .current
            .cmp_key(&self.current)
            .then_with(|| self.rank.cmp(&other.rank))
    }
}

/// Merges ranked sorted sources; see the module docs for the rules
pub struct MergeIterator<'a> {
    heap: BinaryHeap<Cursor<'a>>,
    /// Set after an error has been yielded; the stream is over
    failed: bool,
}

impl<'a> MergeIterator<'a> {
    /// Build the heap by pulling the first entry of every source.
    ///
    /// Ranks must be distinct across `sources`.
    pub fn new(sources: Vec<MergeSource<'a>>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for MergeSource { rank, mut iter } in sources {
            if let Some(first) = iter.next() {
                heap.push(Cursor {
                    current: first?,
                    rank,
                    rest: iter,
                });
            }
        }

        Ok(Self {
            heap,
            failed: false,
        })
    }

    /// Pull one step: the next live entry, or `None` once every source is
    /// exhausted.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        while let Some(mut winner) = self.heap.pop() {
            while self
                .heap
                .peek()
                .is_some_and(|top| top.current.key() == winner.current.key())
            {
                let Some(mut duplicate) = self.heap.pop() else {
                    break;
                };
                if duplicate.rank > winner.rank {
                    std::mem::swap(&mut winner, &mut duplicate);
                }
                self.advance(duplicate)?;
            }

            let entry = self.advance(winner)?;
            if !entry.is_tombstone() {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Number of sources that still have entries
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }

    /// Move `cursor` past its current entry, re-inserting it if it has more.
    /// Returns the entry it was positioned on.
    fn advance(&mut self, mut cursor: Cursor<'a>) -> Result<Entry> {
        match cursor.rest.next() {
            Some(Ok(next)) => {
                let previous = std::mem::replace(&mut cursor.current, next);
                self.heap.push(cursor);
                Ok(previous)
            }
            Some(Err(e)) => Err(e),
            None => Ok(cursor.current),
        }
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                self.heap.clear();
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for MergeIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeIterator")
            .field("live_sources", &self.heap.len())
            .field("failed", &self.failed)
            .finish()
    }
}
