//! Segment Store
//!
//! Owns every on-disk segment and is the persistence and compaction authority.
//!
//! ## Responsibilities
//! - Discover existing segments on startup and restore their precedence
//! - Point lookups newest → oldest
//! - Merged range reads across live memtables and segments
//! - Persist memtables as new segments
//! - Compact all segments into one
//!
//! ## Crash Safety
//! Segments are written to `<name>.tmp`, fsynced, then renamed into place. A
//! compaction result takes the generation of the newest segment it merged
//! and replaces that file; its metadata is flagged `compacted`, and on open
//! every segment older than the newest compacted one is discarded. Old inputs
//! are only deleted after the result is durable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::Entry;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::merge::{MergeIterator, MergeSource};

use super::{SegmentBuilder, SegmentMeta, SegmentReader};

/// Manages the set of segments
///
/// ## Concurrency:
/// - `segments`: Protected by RwLock, held only to copy or swap the list,
///   never across I/O
/// - `next_generation`: Atomic counter (lock-free)
/// - `save` is driven by one thread at a time (the flush worker, then
///   `close`), and `compact` by the compaction worker
pub struct SegmentStore {
    /// Directory where segments are stored
    data_dir: PathBuf,

    /// Open segment readers, ordered newest → oldest
    segments: RwLock<Vec<Arc<SegmentReader>>>,

    /// Generation for the next saved segment
    next_generation: AtomicU64,

    closed: AtomicBool,
}

impl SegmentStore {
    const SEGMENT_PREFIX: &'static str = "segment_";
    const SEGMENT_EXT: &'static str = "seg";
    const TMP_EXT: &'static str = "tmp";

    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftover temporary files from interrupted writes
    /// 3. Open readers for each segment (loads indexes into RAM)
    /// 4. Drop segments superseded by a compaction
    /// 5. Order by generation descending (newest first)
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut generations: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if !file_path.is_file() {
                continue;
            }

            if file_path.extension().is_some_and(|ext| ext == Self::TMP_EXT) {
                tracing::warn!(path = %file_path.display(), "Removing incomplete segment");
                fs::remove_file(&file_path)?;
                continue;
            }

            if let Some(generation) = Self::parse_generation(&file_path) {
                generations.push(generation);
            }
        }

        generations.sort_unstable();

        let mut segments = Vec::with_capacity(generations.len());
        for &generation in &generations {
            let segment_path = Self::segment_path_with_dir(path, generation);
            let reader = SegmentReader::open(&segment_path)?;

            if reader.generation() != generation {
                return Err(StrataError::Corruption(format!(
                    "{}: metadata generation {} does not match file name",
                    segment_path.display(),
                    reader.generation()
                )));
            }
            segments.push(Arc::new(reader));
        }

        // Newest compaction result wins over everything older
        let base = segments
            .iter()
            .filter(|s| s.meta().compacted)
            .map(|s| s.generation())
            .max();

        if let Some(base) = base {
            segments.retain(|segment| {
                if segment.generation() >= base {
                    return true;
                }
                tracing::info!(
                    generation = segment.generation(),
                    compacted_into = base,
                    "Removing superseded segment"
                );
                if let Err(e) = fs::remove_file(segment.path()) {
                    tracing::warn!(path = %segment.path().display(), error = %e, "Failed to delete superseded segment");
                }
                false
            });
        }

        segments.reverse();

        // Next generation = max + 1, or 1 if no segments exist
        let next_generation = generations.last().map(|&g| g + 1).unwrap_or(1);

        tracing::info!(
            dir = %path.display(),
            segments = segments.len(),
            next_generation,
            "Segment store opened"
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            segments: RwLock::new(segments),
            next_generation: AtomicU64::new(next_generation),
            closed: AtomicBool::new(false),
        })
    }

    /// Find the newest entry for `key` across all segments
    ///
    /// Returns:
    /// - `Ok(Some(entry))`: found; may be a tombstone, callers filter
    /// - `Ok(None)`: no segment holds the key
    pub fn find_entry(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.ensure_open()?;

        for segment in self.snapshot() {
            // Skip segment if key is outside its range (O(1) check)
            if !segment.might_contain(key) {
                continue;
            }

            if let Some(entry) = segment.get(key)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Merged range read over `[from, to)`
    ///
    /// `live` holds in-memory range snapshots ordered newest first; they all
    /// take precedence over every segment, and segments over each other by
    /// generation.
    pub fn merged_entries(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        live: Vec<Vec<Entry>>,
    ) -> Result<MergeIterator<'static>> {
        self.ensure_open()?;

        let segments = self.snapshot();
        let segment_count = segments.len();
        let live_count = live.len();

        let mut sources = Vec::with_capacity(segment_count + live_count);

        for (i, segment) in segments.iter().enumerate() {
            let rank = segment_count - 1 - i;
            sources.push(MergeSource::new(rank, Box::new(segment.scan(from, to))));
        }

        for (i, entries) in live.into_iter().enumerate() {
            let rank = segment_count + live_count - 1 - i;
            sources.push(MergeSource::from_entries(rank, entries));
        }

        MergeIterator::new(sources)
    }

    /// Persist a MemTable as a new segment
    ///
    /// The segment is durable before this returns and only then becomes
    /// visible to readers.
    pub fn save(&self, memtable: &MemTable) -> Result<SegmentMeta> {
        self.ensure_open()?;

        if memtable.is_empty() {
            return Err(StrataError::Storage("Cannot save empty MemTable".to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(generation);

        let entries = memtable.entries().into_iter().map(Ok);
        let meta = self.write_segment(&path, generation, false, entries)?;

        let reader = Arc::new(SegmentReader::open(&path)?);
        {
            let mut segments = self.segments.write();
            let pos = segments
                .iter()
                .position(|s| s.generation() < generation)
                .unwrap_or(segments.len());
            segments.insert(pos, reader);
        }

        tracing::info!(
            generation,
            entries = meta.entry_count,
            "Saved memtable to segment"
        );

        Ok(meta)
    }

    /// Whether compaction would be a no-op (at most one segment)
    pub fn is_compacted(&self) -> bool {
        self.segments.read().len() <= 1
    }

    /// Merge every current segment into one
    ///
    /// Duplicates resolve to the newest version and tombstones are dropped.
    /// Returns `Ok(None)` when there was nothing to compact.
    pub fn compact(&self) -> Result<Option<SegmentMeta>> {
        self.ensure_open()?;

        let inputs = self.snapshot();
        if inputs.len() <= 1 {
            return Ok(None);
        }

        // Take the newest input's generation so segments saved meanwhile stay newer
        let generation = inputs[0].generation();
        let input_count = inputs.len();

        tracing::info!(segments = input_count, generation, "Starting compaction");

        let sources = inputs
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                MergeSource::new(input_count - 1 - i, Box::new(segment.scan(None, None)))
            })
            .collect();
        let merged = MergeIterator::new(sources)?;

        let path = self.segment_path(generation);
        let meta = self.write_segment(&path, generation, true, merged)?;
        let reader = Arc::new(SegmentReader::open(&path)?);

        let superseded: Vec<Arc<SegmentReader>> = {
            let mut segments = self.segments.write();
            let (keep, old): (Vec<_>, Vec<_>) = segments
                .drain(..)
                .partition(|s| s.generation() > generation);
            *segments = keep;
            segments.push(reader);
            old
        };

        for old in &superseded {
            // The newest input's file was replaced by the rename
            if old.generation() == generation {
                continue;
            }
            if let Err(e) = fs::remove_file(old.path()) {
                tracing::warn!(path = %old.path().display(), error = %e, "Failed to delete compacted segment");
            }
        }

        tracing::info!(
            merged = input_count,
            generation,
            entries = meta.entry_count,
            "Compaction complete"
        );

        Ok(Some(meta))
    }

    /// Release segment handles. Idempotent.
    ///
    /// Iterators that are still alive keep their own segment handles.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.segments.write().clear();
        tracing::info!(dir = %self.data_dir.display(), "Segment store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Generations of the current segments, newest first
    pub fn generations(&self) -> Vec<u64> {
        self.segments.read().iter().map(|s| s.generation()).collect()
    }

    /// Current segment readers, newest first
    pub fn segments(&self) -> Vec<Arc<SegmentReader>> {
        self.snapshot()
    }

    /// Total size of all segment files on disk
    pub fn disk_size(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if Self::parse_generation(&path).is_some() {
                total += fs::metadata(&path)?.len();
            }
        }
        Ok(total)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next generation (for testing/debugging)
    pub fn next_generation(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<SegmentReader>> {
        self.segments.read().clone()
    }

    /// Write a segment to a temporary file, then fsync and rename it to `path`
    fn write_segment(
        &self,
        path: &Path,
        generation: u64,
        compacted: bool,
        entries: impl Iterator<Item = Result<Entry>>,
    ) -> Result<SegmentMeta> {
        let tmp_path = path.with_extension(format!("{}.{}", Self::SEGMENT_EXT, Self::TMP_EXT));

        let written = Self::build_segment(&tmp_path, generation, compacted, entries)
            .and_then(|meta| {
                fs::rename(&tmp_path, path)?;
                sync_dir(&self.data_dir)?;
                Ok(meta)
            });

        if written.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp_path.display(), error = %e, "Failed to remove incomplete segment");
                }
            }
        }

        written
    }

    fn build_segment(
        path: &Path,
        generation: u64,
        compacted: bool,
        entries: impl Iterator<Item = Result<Entry>>,
    ) -> Result<SegmentMeta> {
        let mut builder = SegmentBuilder::new(path, generation)?;
        if compacted {
            builder.mark_compacted();
        }
        for entry in entries {
            builder.add(&entry?)?;
        }
        builder.finish()
    }

    /// Generate the file path for a segment with given generation
    fn segment_path(&self, generation: u64) -> PathBuf {
        Self::segment_path_with_dir(&self.data_dir, generation)
    }

    /// Generate segment path given a directory and generation
    fn segment_path_with_dir(dir: &Path, generation: u64) -> PathBuf {
        dir.join(format!(
            "{}{:06}.{}",
            Self::SEGMENT_PREFIX,
            generation,
            Self::SEGMENT_EXT
        ))
    }

    /// Parse generation from filename
    /// "segment_000042.seg" → Some(42)
    fn parse_generation(path: &Path) -> Option<u64> {
        if path.extension()? != Self::SEGMENT_EXT {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let generation = name.strip_prefix(Self::SEGMENT_PREFIX)?;
        generation.parse().ok()
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("data_dir", &self.data_dir)
            .field("generations", &self.generations())
            .field("next_generation", &self.next_generation())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Make renames in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
