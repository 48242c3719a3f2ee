//! Background Workers
//!
//! Two long-lived threads run beside the callers:
//!
//! ```text
//!   callers ──upsert/flush──▶ HandOff (bounded(1)) ──▶ FlushWorker ──save──▶ SegmentStore
//!   callers ──compact──────▶ unbounded channel ─────▶ CompactionWorker ──compact──▶ SegmentStore
//! ```
//!
//! Both loops block on their channel and stop on an explicit `Shutdown`
//! message (or when every sender is gone). A storage error ends the worker;
//! the error is returned from its thread and surfaced when the engine joins
//! it in `close()`.

mod compaction;
mod flush;

use std::thread::JoinHandle;

use crate::error::{Result, StrataError};

pub use compaction::{CompactionSignal, CompactionWorker};
pub use flush::{FlushMessage, FlushWorker, HandOff};

/// Wait for a worker thread and turn a panic into an error
pub fn join_worker(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(StrataError::WorkerFailed(format!(
                "{} worker panicked: {}",
                name, reason
            )))
        }
    }
}
