//! Compaction Worker
//!
//! Waits for compaction requests and merges all segments into one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;

use crate::error::Result;
use crate::storage::SegmentStore;

/// Signal sent to the compaction worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionSignal {
    /// Compact now, unless there is nothing to merge
    Compact,

    /// Stop the worker
    Shutdown,
}

/// Background loop running compactions on request
pub struct CompactionWorker {
    receiver: Receiver<CompactionSignal>,
    store: Arc<SegmentStore>,
}

impl CompactionWorker {
    pub fn new(receiver: Receiver<CompactionSignal>, store: Arc<SegmentStore>) -> Self {
        Self { receiver, store }
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("strata-compaction".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Block on the signal queue until `Shutdown`; a failed compaction ends the loop
    pub fn run(self) -> Result<()> {
        tracing::debug!("Compaction worker started");

        while let Ok(signal) = self.receiver.recv() {
            match signal {
                CompactionSignal::Compact => {
                    if self.store.is_compacted() {
                        tracing::debug!("Segments already compacted, skipping");
                        continue;
                    }
                    if let Err(e) = self.store.compact() {
                        tracing::error!(error = %e, "Compaction failed, stopping compaction worker");
                        return Err(e);
                    }
                }
                CompactionSignal::Shutdown => break,
            }
        }

        tracing::debug!("Compaction worker stopped");
        Ok(())
    }
}
