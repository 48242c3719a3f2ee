//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Concurrent point/range reads alongside inserts
//! - Ordered iteration for segment creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for segment generation and range reads)
//! - Range reads copy out a snapshot; `Bytes` makes the copy cheap
//!
//! A table is shared as `Arc<MemTable>` while it moves from active, to
//! pending, to in-flight, so the same object stays readable throughout.

mod table;

pub use table::MemTable;
