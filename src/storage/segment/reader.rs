//! Segment Reader
//!
//! Opens segment files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::entry::{Entry, Value};
use crate::error::{Result, StrataError};

use super::iterator::SegmentIterator;
use super::{
    read_u32, read_u64, SegmentMeta, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION,
};

/// Reader for segment files with in-memory index for O(log n) lookups
///
/// The file handle sits behind a mutex so lookups and scans only need
/// `&self`; readers are shared as `Arc<SegmentReader>`.
pub struct SegmentReader {
    path: PathBuf,
    /// File handle for reading entries
    file: Mutex<BufReader<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<Bytes, u64>,
    meta: SegmentMeta,
    /// Index block starting offset (end of the data block)
    index_offset: u64,
    file_size: u64,
}

impl SegmentReader {
    /// Open a segment for reading
    ///
    /// Validates header, footer, metadata and index checksums, then loads the
    /// entire index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(Self::corrupt(path, "file shorter than header and footer"));
        }

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Self::corrupt(
                path,
                &format!("invalid magic: expected STRA, got {:?}", magic),
            ));
        }

        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        let version = u16::from_le_bytes(version);
        if version != VERSION {
            return Err(Self::corrupt(
                path,
                &format!("unsupported version: {}", version),
            ));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let index_offset = read_u64(&mut file)?;
        let meta_len = read_u32(&mut file)? as u64;
        let meta_crc = read_u32(&mut file)?;

        let meta_offset = match (file_size - FOOTER_SIZE).checked_sub(meta_len) {
            Some(off) if off >= index_offset && index_offset >= HEADER_SIZE => off,
            _ => return Err(Self::corrupt(path, "footer offsets out of bounds")),
        };

        // Meta block
        file.seek(SeekFrom::Start(meta_offset))?;
        let mut meta_bytes = vec![0u8; meta_len as usize];
        file.read_exact(&mut meta_bytes)?;
        if crc32fast::hash(&meta_bytes) != meta_crc {
            return Err(Self::corrupt(path, "metadata checksum mismatch"));
        }
        let meta: SegmentMeta = bincode::deserialize(&meta_bytes)
            .map_err(|e| Self::corrupt(path, &format!("undecodable metadata: {}", e)))?;

        // Index block
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (meta_offset - index_offset) as usize];
        file.read_exact(&mut index_data)?;
        if crc32fast::hash(&index_data) != meta.index_crc {
            return Err(Self::corrupt(path, "index checksum mismatch"));
        }

        let index = Self::parse_index(&index_data, index_offset)
            .map_err(|e| Self::corrupt(path, &format!("truncated index block: {}", e)))?;

        if index.len() as u64 != meta.entry_count {
            return Err(Self::corrupt(
                path,
                &format!(
                    "index holds {} keys, metadata says {}",
                    index.len(),
                    meta.entry_count
                ),
            ));
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            meta,
            index_offset,
            file_size,
        })
    }

    /// Get the entry for `key`: O(log n) lookup via in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: key present (the entry may be a tombstone)
    /// - `Ok(None)`: key not in this segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.meta.might_contain(key) {
            return Ok(None);
        }

        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        let (entry, _) = self.read_entry_at(offset)?;
        Ok(Some(entry))
    }

    /// Read the entry starting at `offset`; returns it with the offset of the
    /// following entry
    pub(super) fn read_entry_at(&self, offset: u64) -> Result<(Entry, u64)> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let key_len = read_u32(&mut *file)? as usize;
        let val_len = read_u32(&mut *file)?;

        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;

        let mut entry_size = 8 + key_len as u64;

        let value = if val_len == TOMBSTONE_MARKER {
            Value::Tombstone
        } else {
            let mut v = vec![0u8; val_len as usize];
            file.read_exact(&mut v)?;
            entry_size += val_len as u64;
            Value::Live(Bytes::from(v))
        };

        Ok((Entry::from_parts(Bytes::from(key), value), offset + entry_size))
    }

    /// Scan the half-open range `[from, to)` in key order
    pub fn scan(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> SegmentIterator {
        let start = match from {
            Some(from) => self
                .index
                .range::<[u8], _>((Bound::Included(from), Bound::Unbounded))
                .next()
                .map(|(_, &off)| off)
                .unwrap_or(self.index_offset),
            None => HEADER_SIZE,
        };

        SegmentIterator::new(
            Arc::clone(self),
            start,
            self.index_offset,
            to.map(Bytes::copy_from_slice),
        )
    }

    /// Recompute the data block checksum and compare it with the metadata
    pub fn verify(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = self.index_offset - HEADER_SIZE;
        let mut buf = vec![0u8; 64 * 1024];

        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..chunk])?;
            hasher.update(&buf[..chunk]);
            remaining -= chunk as u64;
        }

        let actual = hasher.finalize();
        if actual != self.meta.data_crc {
            return Err(Self::corrupt(
                &self.path,
                &format!(
                    "data checksum mismatch: expected {:08x}, got {:08x}",
                    self.meta.data_crc, actual
                ),
            ));
        }
        Ok(())
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Quick check if a key might be in this segment (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.might_contain(key)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Parse index entries: [key_len(4)][offset(8)][key]
    fn parse_index(data: &[u8], index_offset: u64) -> io::Result<BTreeMap<Bytes, u64>> {
        let mut index = BTreeMap::new();
        let mut cursor = Cursor::new(data);

        while (cursor.position() as usize) < data.len() {
            let key_len = read_u32(&mut cursor)? as usize;
            let offset = read_u64(&mut cursor)?;

            let remaining = data.len() - cursor.position() as usize;
            if key_len > remaining {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("key of {} bytes with {} left in index", key_len, remaining),
                ));
            }

            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;

            if offset < HEADER_SIZE || offset >= index_offset {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry offset {} outside data block", offset),
                ));
            }

            index.insert(Bytes::from(key), offset);
        }

        Ok(index)
    }

    fn corrupt(path: &Path, reason: &str) -> StrataError {
        StrataError::Corruption(format!("{}: {}", path.display(), reason))
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("file_size", &self.file_size)
            .finish()
    }
}
