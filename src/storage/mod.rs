//! Storage Module
//!
//! Persistent storage layer: immutable sorted segments on disk.
//!
//! ## Responsibilities
//! - Persist memtables as segments, durably
//! - Efficient point lookups via per-segment in-memory index
//! - Merged range scans across memtables and segments
//! - Compaction of all segments into one
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   segment_000001.seg     (oldest)
//!   segment_000002.seg
//!   segment_000003.seg     (newest; wins on duplicate keys)
//! ```

mod segment;
mod store;

pub use segment::{SegmentBuilder, SegmentIterator, SegmentMeta, SegmentReader};
pub use store::SegmentStore;
