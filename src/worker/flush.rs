//! Flush Worker
//!
//! Drains the capacity-1 hand-off slot and persists each delivered table.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::storage::SegmentStore;

/// Message delivered through the hand-off slot
#[derive(Debug)]
pub enum FlushMessage {
    /// A full table to persist
    Table(Arc<MemTable>),

    /// Stop the worker
    Shutdown,
}

/// Tables that left the active slot but are not yet in a segment
#[derive(Default)]
struct FlushTables {
    /// Handed off, waiting for the worker (oldest at the front)
    pending: VecDeque<Arc<MemTable>>,

    /// Currently being saved by the worker
    in_flight: Option<Arc<MemTable>>,
}

/// Capacity-1 hand-off slot between callers and the flush worker
///
/// Besides the channel it keeps every table it has accepted readable until
/// the corresponding segment is visible in the store: a table is listed as
/// pending from the moment it is handed off, moves to in-flight atomically
/// when the worker picks it up, and is dropped only after `save` returns.
pub struct HandOff {
    sender: Sender<FlushMessage>,
    tables: RwLock<FlushTables>,
}

impl HandOff {
    /// Create the slot and the receiving end for the worker
    pub fn channel() -> (Arc<Self>, Receiver<FlushMessage>) {
        let (sender, receiver) = channel::bounded(1);
        let handoff = Arc::new(Self {
            sender,
            tables: RwLock::new(FlushTables::default()),
        });
        (handoff, receiver)
    }

    /// Hand off `table` without blocking
    ///
    /// Returns `Ok(false)` when the slot is still occupied by the previous
    /// table.
    pub fn try_hand_off(&self, table: Arc<MemTable>) -> Result<bool> {
        // Hold the lock so the worker cannot pick the table up before it is listed
        let mut tables = self.tables.write();
        match self.sender.try_send(FlushMessage::Table(Arc::clone(&table))) {
            Ok(()) => {
                tables.pending.push_back(table);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(Self::worker_gone()),
        }
    }

    /// List `table` as pending ahead of a blocking [`HandOff::send`]
    ///
    /// Call this before the table stops being the active one so readers
    /// never miss it.
    pub fn mark_pending(&self, table: Arc<MemTable>) {
        self.tables.write().pending.push_back(table);
    }

    /// Send a table listed with [`HandOff::mark_pending`], blocking while
    /// the slot is occupied
    ///
    /// If the worker is gone the table stays listed as pending, so it remains
    /// readable and `Engine::close` persists it.
    pub fn send(&self, table: Arc<MemTable>) -> Result<()> {
        self.sender
            .send(FlushMessage::Table(table))
            .map_err(|_| Self::worker_gone())
    }

    /// Ask the worker to stop once it has drained the slot
    pub fn shutdown(&self) -> Result<()> {
        self.sender
            .send(FlushMessage::Shutdown)
            .map_err(|_| Self::worker_gone())
    }

    /// Tables not yet persisted, newest first: pending, then in-flight
    pub fn visible_tables(&self) -> Vec<Arc<MemTable>> {
        let tables = self.tables.read();
        tables
            .pending
            .iter()
            .rev()
            .chain(tables.in_flight.iter())
            .cloned()
            .collect()
    }

    /// Remove and return every table not yet persisted, oldest first
    pub fn take_unflushed(&self) -> Vec<Arc<MemTable>> {
        let mut tables = self.tables.write();
        let mut unflushed: Vec<_> = tables.in_flight.take().into_iter().collect();
        unflushed.extend(tables.pending.drain(..));
        unflushed
    }

    /// Number of tables waiting for the worker
    pub fn pending_count(&self) -> usize {
        self.tables.read().pending.len()
    }

    pub fn has_in_flight(&self) -> bool {
        self.tables.read().in_flight.is_some()
    }

    // =========================================================================
    // Worker side
    // =========================================================================

    fn begin_flush(&self, table: &Arc<MemTable>) {
        let mut tables = self.tables.write();
        tables.pending.retain(|t| !Arc::ptr_eq(t, table));
        tables.in_flight = Some(Arc::clone(table));
    }

    fn end_flush(&self) {
        self.tables.write().in_flight = None;
    }

    /// Put the in-flight table back at the head of the queue after a failed save
    fn abort_flush(&self) {
        let mut tables = self.tables.write();
        if let Some(table) = tables.in_flight.take() {
            tables.pending.push_front(table);
        }
    }

    fn worker_gone() -> StrataError {
        StrataError::WorkerFailed("flush worker is not running".to_string())
    }
}

/// Background loop persisting handed-off tables
pub struct FlushWorker {
    handoff: Arc<HandOff>,
    receiver: Receiver<FlushMessage>,
    store: Arc<SegmentStore>,
}

impl FlushWorker {
    pub fn new(
        handoff: Arc<HandOff>,
        receiver: Receiver<FlushMessage>,
        store: Arc<SegmentStore>,
    ) -> Self {
        Self {
            handoff,
            receiver,
            store,
        }
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("strata-flush".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Block on the slot until `Shutdown`; the first failed save ends the loop
    pub fn run(self) -> Result<()> {
        tracing::debug!("Flush worker started");

        while let Ok(message) = self.receiver.recv() {
            match message {
                FlushMessage::Table(table) => self.flush_table(table)?,
                FlushMessage::Shutdown => break,
            }
        }

        tracing::debug!("Flush worker stopped");
        Ok(())
    }

    fn flush_table(&self, table: Arc<MemTable>) -> Result<()> {
        self.handoff.begin_flush(&table);

        if table.is_empty() {
            self.handoff.end_flush();
            return Ok(());
        }

        match self.store.save(&table) {
            Ok(_) => {
                self.handoff.end_flush();
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, entries = table.entry_count(), "Flush failed, stopping flush worker");
                self.handoff.abort_flush();
                Err(e)
            }
        }
    }
}
