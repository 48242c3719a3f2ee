//! Segment Builder
//!
//! Writes sorted entries to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::entry::Entry;
use crate::error::{Result, StrataError};

use super::{SegmentMeta, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating a new segment from sorted entries
pub struct SegmentBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    generation: u64,
    compacted: bool,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of entry
    index: Vec<(Bytes, u64)>,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
}

impl SegmentBuilder {
    /// Create a new segment builder
    ///
    /// Writes header immediately; call `add()` in strictly ascending key
    /// order, then `finish()` to write index, metadata and footer.
    pub fn new(path: &Path, generation: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            generation,
            compacted: false,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Flag the segment as a compaction result
    pub fn mark_compacted(&mut self) {
        self.compacted = true;
    }

    /// Add an entry (value or tombstone)
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        let key = entry.key();

        if let Some((last, _)) = self.index.last() {
            if key <= last {
                return Err(StrataError::Storage(format!(
                    "Segment keys must be strictly ascending: {:?} after {:?}",
                    key, last
                )));
            }
        }

        let key_len = Self::checked_len(key.len(), "key")?;
        let val_len = match entry.value() {
            Some(v) => Self::checked_len(v.len(), "value")?,
            None => TOMBSTONE_MARKER,
        };

        self.index.push((key.clone(), self.current_offset));

        // [key_len(4)][val_len(4)][key][value]
        let key_len_bytes = key_len.to_le_bytes();
        let val_len_bytes = val_len.to_le_bytes();

        self.writer.write_all(&key_len_bytes)?;
        self.writer.write_all(&val_len_bytes)?;
        self.writer.write_all(key)?;

        self.data_hasher.update(&key_len_bytes);
        self.data_hasher.update(&val_len_bytes);
        self.data_hasher.update(key);

        let mut entry_size: u64 = 8 + key.len() as u64;

        if let Some(v) = entry.value() {
            self.writer.write_all(v)?;
            self.data_hasher.update(v);
            entry_size += v.len() as u64;
        }

        self.current_offset += entry_size;
        self.entry_count += 1;

        Ok(())
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: write index, metadata and footer, then fsync
    pub fn finish(mut self) -> Result<SegmentMeta> {
        let index_offset = self.current_offset;
        let mut index_hasher = crc32fast::Hasher::new();

        for (key, offset) in &self.index {
            let key_len = (key.len() as u32).to_le_bytes();
            let offset = offset.to_le_bytes();
            self.writer.write_all(&key_len)?;
            self.writer.write_all(&offset)?;
            self.writer.write_all(key)?;
            index_hasher.update(&key_len);
            index_hasher.update(&offset);
            index_hasher.update(key);
        }

        let meta = SegmentMeta {
            generation: self.generation,
            entry_count: self.entry_count,
            min_key: self.index.first().map(|(k, _)| k.to_vec()).unwrap_or_default(),
            max_key: self.index.last().map(|(k, _)| k.to_vec()).unwrap_or_default(),
            data_crc: self.data_hasher.finalize(),
            index_crc: index_hasher.finalize(),
            compacted: self.compacted,
        };

        let meta_bytes = bincode::serialize(&meta)
            .map_err(|e| StrataError::Serialization(format!("Segment metadata: {}", e)))?;
        let meta_len = Self::checked_len(meta_bytes.len(), "metadata")?;
        let meta_crc = crc32fast::hash(&meta_bytes);

        self.writer.write_all(&meta_bytes)?;

        // Footer: index_offset (8) + meta_len (4) + meta_crc (4)
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&meta_len.to_le_bytes())?;
        self.writer.write_all(&meta_crc.to_le_bytes())?;

        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            StrataError::Storage(format!(
                "Failed to flush segment {}: {}",
                self.path.display(),
                e
            ))
        })?;
        file.sync_all()?;

        Ok(meta)
    }

    fn checked_len(len: usize, what: &str) -> Result<u32> {
        match u32::try_from(len) {
            Ok(n) if n != TOMBSTONE_MARKER => Ok(n),
            _ => Err(StrataError::Storage(format!(
                "Segment {} too large: {} bytes",
                what, len
            ))),
        }
    }
}
