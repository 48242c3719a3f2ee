//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Own the active memtable and its byte-size accounting
//! - Hand full tables to the flush worker (backpressure point)
//! - Signal the compaction worker
//! - Answer reads from active, pending, in-flight tables and segments
//! - Orchestrate shutdown

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::merge::{MergeIterator, MergeSource};
use crate::storage::SegmentStore;
use crate::worker::{
    join_worker, CompactionSignal, CompactionWorker, FlushWorker, HandOff,
};

// Lifecycle states; transitions only go forward
const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (upsert): Concurrent. Each write holds the read side of the
///   `active` lock while inserting, so a swap (write side) never races an
///   insert into a table that is being handed off.
/// - **Swaps**: `swap_lock` guards the hand-off of the active table. `upsert`
///   only *tries* the lock: a writer that finds a swap in progress writes
///   into the current table instead of waiting.
/// - **Reads** (get/get_range): Lock-free with respect to writers apart from
///   the brief `active` read lock. Reads see active → pending → in-flight →
///   segments, newest first.
/// - **Accounting**: `active_bytes` is an atomic counter shared by writers.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Table receiving all new writes
    active: RwLock<Arc<MemTable>>,

    /// Approximate bytes written into the active table since its last swap
    active_bytes: AtomicUsize,

    /// Serializes table swaps (upsert hand-off and flush)
    swap_lock: Mutex<()>,

    /// Set after a deferred swap has been logged; cleared by the next swap
    backpressure_logged: AtomicBool,

    /// OPEN → CLOSING → CLOSED
    state: AtomicU8,

    /// Segment store and background workers; `None` in memory-only mode
    persistence: Option<Persistence>,
}

/// Everything the engine owns when it has a data directory
struct Persistence {
    store: Arc<SegmentStore>,
    handoff: Arc<HandOff>,
    compaction_tx: Sender<CompactionSignal>,
    workers: Mutex<Workers>,
}

struct Workers {
    flush: Option<JoinHandle<Result<()>>>,
    compaction: Option<JoinHandle<Result<()>>>,
}

impl Persistence {
    /// Load the segment store and start both workers
    fn start(dir: &Path) -> Result<Self> {
        let store = Arc::new(SegmentStore::open(dir)?);

        let (handoff, flush_rx) = HandOff::channel();
        let flush = FlushWorker::new(Arc::clone(&handoff), flush_rx, Arc::clone(&store)).spawn()?;

        let (compaction_tx, compaction_rx) = channel::unbounded();
        let compaction = match CompactionWorker::new(compaction_rx, Arc::clone(&store)).spawn() {
            Ok(handle) => handle,
            Err(e) => {
                handoff.shutdown().ok();
                join_worker("flush", flush).ok();
                return Err(e);
            }
        };

        Ok(Self {
            store,
            handoff,
            compaction_tx,
            workers: Mutex::new(Workers {
                flush: Some(flush),
                compaction: Some(compaction),
            }),
        })
    }
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config
    /// 2. Load existing segments (persistent mode)
    /// 3. Start the flush and compaction workers
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let persistence = match &config.data_dir {
            Some(dir) => Some(Persistence::start(dir)?),
            None => None,
        };

        tracing::info!(
            data_dir = ?config.data_dir,
            flush_threshold_bytes = config.flush_threshold_bytes,
            "Engine opened"
        );

        Ok(Self {
            config,
            active: RwLock::new(Arc::new(MemTable::new())),
            active_bytes: AtomicUsize::new(0),
            swap_lock: Mutex::new(()),
            backpressure_logged: AtomicBool::new(false),
            state: AtomicU8::new(OPEN),
            persistence,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get the live entry for `key`
    ///
    /// Search order, first hit wins:
    /// 1. Active table
    /// 2. Pending tables (handed off, not yet picked up)
    /// 3. In-flight table (being saved)
    /// 4. Segments (newest to oldest)
    ///
    /// A tombstone anywhere in the chain means "not found".
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.ensure_open()?;

        if let Some(entry) = self.active_table().get(key) {
            return Ok(Self::live(entry));
        }

        let Some(persistence) = &self.persistence else {
            return Ok(None);
        };

        for table in persistence.handoff.visible_tables() {
            if let Some(entry) = table.get(key) {
                return Ok(Self::live(entry));
            }
        }

        Ok(persistence.store.find_entry(key)?.and_then(Self::live))
    }

    /// Get the live value for `key`
    pub fn get_value(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.get(key)?.and_then(|entry| entry.value().cloned()))
    }

    /// Live entries in the half-open range `[from, to)`, in key order
    ///
    /// Either bound may be omitted. The returned iterator is lazy over the
    /// segments and sees the memtables as they were when it was created.
    pub fn get_range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<MergeIterator<'static>> {
        self.ensure_open()?;

        let active = self.active_table().range(from, to);

        let Some(persistence) = &self.persistence else {
            return MergeIterator::new(vec![MergeSource::from_entries(0, active)]);
        };

        let mut live = vec![active];
        live.extend(
            persistence
                .handoff
                .visible_tables()
                .iter()
                .map(|table| table.range(from, to)),
        );

        persistence.store.merged_entries(from, to, live)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace an entry; a tombstone entry deletes the key
    ///
    /// Never blocks on I/O. Once the accumulated size crosses the flush
    /// threshold the active table is handed to the flush worker; if the slot
    /// is still occupied the swap is deferred and the write goes into the
    /// current table.
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        self.ensure_open()?;

        let size = entry.encoded_len();

        match &self.persistence {
            Some(persistence)
                if self.active_bytes.load(Ordering::SeqCst) + size
                    > self.config.flush_threshold_bytes =>
            {
                self.swap_if_full(persistence, size);
            }
            _ => {
                self.active_bytes.fetch_add(size, Ordering::SeqCst);
            }
        }

        // Re-checked under the read guard: `close` flips the state before it
        // takes the write side, so an accepted write always lands in a table
        // that `close` persists.
        let active = self.active.read();
        self.ensure_open()?;
        active.insert(entry);
        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.upsert(Entry::new(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)))
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.upsert(Entry::tombstone(Bytes::copy_from_slice(key)))
    }

    /// Hand the active table to the flush worker now
    ///
    /// Blocks while the slot is occupied. Returns once the table is queued,
    /// not once it is on disk. No-op for an empty table or in memory-only mode.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;

        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        // Held across the send so tables reach the worker in swap order
        let _swap = self.swap_lock.lock();

        let table = {
            let mut active = self.active.write();
            self.ensure_open()?;
            if active.is_empty() {
                return Ok(());
            }
            let full = std::mem::replace(&mut *active, Arc::new(MemTable::new()));
            persistence.handoff.mark_pending(Arc::clone(&full));
            self.active_bytes.store(0, Ordering::SeqCst);
            self.backpressure_logged.store(false, Ordering::SeqCst);
            full
        };

        tracing::debug!(entries = table.entry_count(), "Flushing active table");
        match persistence.handoff.send(table) {
            // A concurrent `close` stopped the worker. The table was listed
            // as pending while the engine was open, so `close` saves it
            Err(_) if self.is_closed() => Ok(()),
            result => result,
        }
    }

    /// Ask the compaction worker to merge all segments; does not wait
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;

        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        persistence
            .compaction_tx
            .send(CompactionSignal::Compact)
            .map_err(|_| StrataError::WorkerFailed("compaction worker is not running".to_string()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the engine. Idempotent: later calls return `Ok(())`.
    ///
    /// 1. Stop accepting operations
    /// 2. Stop both workers and wait for them
    /// 3. Persist every table not yet on disk, oldest first, active last
    /// 4. Release the segment store
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned, including a worker's failure.
    pub fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        tracing::info!("Closing engine");

        let mut first_error = None;

        if let Some(persistence) = &self.persistence {
            // A failed send means the worker already exited; joining reports why
            if persistence.compaction_tx.send(CompactionSignal::Shutdown).is_err() {
                tracing::debug!("Compaction worker already stopped");
            }
            if persistence.handoff.shutdown().is_err() {
                tracing::debug!("Flush worker already stopped");
            }

            let (flush, compaction) = {
                let mut workers = persistence.workers.lock();
                (workers.flush.take(), workers.compaction.take())
            };
            if let Some(handle) = flush {
                keep_first(&mut first_error, join_worker("flush", handle));
            }
            if let Some(handle) = compaction {
                keep_first(&mut first_error, join_worker("compaction", handle));
            }

            // Holding the write side drains every writer that saw OPEN and
            // keeps a racing `flush` from moving a table out of reach
            let unflushed = {
                let mut active = self.active.write();
                let mut unflushed = persistence.handoff.take_unflushed();
                unflushed.push(std::mem::replace(&mut *active, Arc::new(MemTable::new())));
                unflushed
            };

            for table in unflushed.iter().filter(|table| !table.is_empty()) {
                keep_first(&mut first_error, persistence.store.save(table).map(|_| ()));
            }

            persistence.store.close();
        }

        self.active_bytes.store(0, Ordering::SeqCst);
        self.state.store(CLOSED, Ordering::SeqCst);

        match first_error {
            Some(e) => {
                tracing::error!(error = %e, "Engine closed with errors");
                Err(e)
            }
            None => {
                tracing::info!("Engine closed");
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != OPEN
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the data directory path, `None` in memory-only mode
    pub fn data_dir(&self) -> Option<&Path> {
        self.config.data_dir.as_deref()
    }

    /// Bytes accumulated in the active table since its last swap
    pub fn active_size(&self) -> usize {
        self.active_bytes.load(Ordering::SeqCst)
    }

    /// Get the active table entry count
    pub fn active_entry_count(&self) -> usize {
        self.active_table().entry_count()
    }

    /// Tables handed off but not yet in a segment (pending plus in-flight)
    pub fn unflushed_table_count(&self) -> usize {
        self.persistence.as_ref().map_or(0, |p| {
            p.handoff.pending_count() + usize::from(p.handoff.has_in_flight())
        })
    }

    /// Get the number of segments
    pub fn segment_count(&self) -> usize {
        self.persistence
            .as_ref()
            .map_or(0, |p| p.store.segment_count())
    }

    /// Whether a compaction would be a no-op
    pub fn is_compacted(&self) -> bool {
        self.persistence
            .as_ref()
            .map_or(true, |p| p.store.is_compacted())
    }

    /// Total size of all segment files on disk
    pub fn disk_size(&self) -> Result<u64> {
        match &self.persistence {
            Some(p) => p.store.disk_size(),
            None => Ok(0),
        }
    }

    /// The segment store, `None` in memory-only mode
    pub fn store(&self) -> Option<&SegmentStore> {
        self.persistence.as_ref().map(|p| p.store.as_ref())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != OPEN {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    fn active_table(&self) -> Arc<MemTable> {
        Arc::clone(&self.active.read())
    }

    fn live(entry: Entry) -> Option<Entry> {
        if entry.is_tombstone() {
            None
        } else {
            Some(entry)
        }
    }

    /// Account `size` and swap the active table if it is still over the
    /// threshold. Deferred when another writer is swapping or the slot is full.
    fn swap_if_full(&self, persistence: &Persistence, size: usize) {
        let Some(_swap) = self.swap_lock.try_lock() else {
            self.active_bytes.fetch_add(size, Ordering::SeqCst);
            return;
        };

        // Re-check under the lock: a racing writer may have swapped already
        let accumulated = self.active_bytes.fetch_add(size, Ordering::SeqCst) + size;
        if accumulated <= self.config.flush_threshold_bytes {
            return;
        }

        let mut active = self.active.write();
        if active.is_empty() || self.is_closed() {
            return;
        }

        match persistence.handoff.try_hand_off(Arc::clone(&active)) {
            Ok(true) => {
                tracing::debug!(
                    entries = active.entry_count(),
                    bytes = accumulated - size,
                    "Handed off active table"
                );
                *active = Arc::new(MemTable::new());
                self.active_bytes.store(size, Ordering::SeqCst);
                self.backpressure_logged.store(false, Ordering::SeqCst);
            }
            Ok(false) => {
                if !self.backpressure_logged.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        bytes = accumulated,
                        threshold = self.config.flush_threshold_bytes,
                        "Flush slot occupied, deferring table swap"
                    );
                }
            }
            Err(e) => {
                if !self.backpressure_logged.swap(true, Ordering::SeqCst) {
                    tracing::error!(error = %e, "Cannot hand off active table, keeping it in memory");
                }
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Error closing engine on drop");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("active_size", &self.active_size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Record `result` if it is the first error of a multi-step operation
fn keep_first(slot: &mut Option<StrataError>, result: Result<()>) {
    if let Err(e) = result {
        match slot {
            None => *slot = Some(e),
            Some(_) => tracing::error!(error = %e, "Additional error during close"),
        }
    }
}
