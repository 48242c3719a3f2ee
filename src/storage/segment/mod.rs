//! Segment Module
//!
//! Immutable on-disk sorted run of entries.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                        │
//! │   Magic: "STRA" (4) | Version: u16 (2)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry ...                       │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [KeyLen: u32][Offset: u64][Key]                       │
//! │   ... repeated for each entry ...                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Meta Block (variable)                                   │
//! │   bincode(SegmentMeta)                                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | MetaLen: u32 (4) | MetaCRC (4) │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod iterator;
mod reader;

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

pub use builder::SegmentBuilder;
pub use iterator::SegmentIterator;
pub use reader::SegmentReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a Strata segment file
pub(crate) const MAGIC: &[u8; 4] = b"STRA";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Footer size: IndexOffset (8) + MetaLen (4) + MetaCRC (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Sentinel value indicating a tombstone (deleted key)
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

// =============================================================================
// Segment Metadata
// =============================================================================

/// Metadata block stored at the end of every segment.
///
/// Everything `SegmentStore::open` needs to restore precedence after a
/// restart lives here, so segment files are self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Creation order; higher generations win over lower ones
    pub generation: u64,
    /// Number of entries, tombstones included
    pub entry_count: u64,
    /// Smallest key (empty for an empty segment)
    pub min_key: Vec<u8>,
    /// Largest key (empty for an empty segment)
    pub max_key: Vec<u8>,
    /// CRC32 of the whole data block
    pub data_crc: u32,
    /// CRC32 of the whole index block, checked on every open
    pub index_crc: u32,
    /// Produced by compaction: supersedes every segment with a lower generation
    pub compacted: bool,
}

impl SegmentMeta {
    /// Quick check if a key might be in this segment (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }
}

// =============================================================================
// Little-endian helpers
// =============================================================================

pub(crate) fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
