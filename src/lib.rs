//! # Strata
//!
//! An embedded LSM key-value storage engine with:
//! - An in-memory active table absorbing all writes
//! - A capacity-1 hand-off to a background flush worker (backpressure)
//! - Immutable, sorted segment files on disk
//! - Background compaction merging all segments into one
//! - Range scans over a k-way merge with newest-wins precedence
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │        upsert / get / get_range / flush / compact            │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//!  ┌─────────────┐      ┌───────────────┐      ┌────────────────┐
//!  │   Active    │─────▶│   HandOff     │─────▶│  FlushWorker   │
//!  │  MemTable   │ full │  (bounded 1)  │      │    (thread)    │
//!  └─────────────┘      └───────────────┘      └───────┬────────┘
//!                                                      │ save
//!                       ┌───────────────┐      ┌───────▼────────┐
//!                       │ Compaction    │─────▶│  SegmentStore  │
//!                       │ Worker        │      │  (segments)    │
//!                       └───────────────┘      └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use strata::{Config, Engine};
//!
//! let engine = Engine::open(Config::builder().data_dir("./data").build())?;
//! engine.put(b"k", b"v")?;
//! assert_eq!(engine.get_value(b"k")?.as_deref(), Some(&b"v"[..]));
//! engine.close()?;
//! # Ok::<(), strata::StrataError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entry;
pub mod memtable;
pub mod merge;
pub mod storage;
pub mod worker;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StrataError, Result};
pub use config::Config;
pub use entry::{Entry, Value};
pub use merge::MergeIterator;
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
