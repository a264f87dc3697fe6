//! Storage Module
//!
//! Persistent storage layer: immutable SSTables plus the background work
//! that creates and merges them.
//!
//! ## Responsibilities
//! - Persist frozen memtables as sorted, binary-searchable tables
//! - Point lookups and range scans over memory-mapped tables
//! - Background flush and full compaction
//! - Crash-safe publication via atomic rename, and recovery on startup
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── 00000000000000000007.data      (live table, seq 7)
//!   ├── 00000000000000000007.index
//!   ├── 00000000000000000009.data.tmp  (flush in progress)
//!   └── 00000000000000000008.data.compacting (compaction in progress)
//! ```

pub mod sstable;

pub(crate) mod compaction;
pub(crate) mod flush;
mod manager;

pub use manager::{Recovered, StorageManager};
pub use sstable::{
    write_table, FileRole, FileStage, SSTable, SSTableBuilder, SSTableIterator, SSTableReader,
    TableFiles,
};
