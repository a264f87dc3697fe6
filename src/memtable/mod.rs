//! MemTable Module
//!
//! In-memory buffer of recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Track size for flush triggers
//! - Ordered iteration for SSTable creation and merged reads
//!
//! ## Data Structure Choice
//! BTreeMap keyed by `Bytes` wrapped in a RwLock. `Bytes` orders by unsigned
//! lexicographic comparison, the same order as [`crate::key::compare`].
//!
//! ## Lifecycle
//! A memtable is *active* while it receives writes. The engine freezes it by
//! swapping in a fresh one and handing the old one to the flush worker; from
//! then on nothing mutates it and it is dropped once its SSTable is
//! published.

mod table;

pub use table::MemTable;
