//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! Each table is a pair of files sharing a sequence number:
//! ```text
//! {seq:020}.data
//! ┌─────────────────────────────────────────────────────────┐
//! │ [KeyLen: u64][Key][ValLen: i64][Value]                  │
//! │ ... repeated for each entry, ascending key order ...    │
//! │ (ValLen = -1 means tombstone, no value bytes)           │
//! └─────────────────────────────────────────────────────────┘
//!
//! {seq:020}.index
//! ┌─────────────────────────────────────────────────────────┐
//! │ [Offset: u64] ... one per record, pointing into .data   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## File Stages
//! A table is written under a staging suffix and renamed into place:
//! - `.tmp`: flush output not yet published
//! - `.compacting`: compaction output not yet complete
//! - `.compacted`: finished compaction output awaiting promotion
//!
//! Renames always move the index first and the data file last, so the data
//! file's name is the commit point of every transition.

mod builder;
mod iterator;
mod reader;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::Result;

pub use builder::{write_table, SSTableBuilder};
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Size of one index slot
pub(crate) const OFFSET_SIZE: usize = 8;

// =============================================================================
// File Naming
// =============================================================================

/// Which half of a table pair a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileRole {
    Data,
    Index,
}

impl FileRole {
    fn extension(self) -> &'static str {
        match self {
            FileRole::Data => "data",
            FileRole::Index => "index",
        }
    }
}

/// Publication stage of a table file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileStage {
    /// Published, visible to readers
    Live,
    /// Flush output before rename
    Temp,
    /// Compaction output still being written
    Compacting,
    /// Compaction output complete, not yet promoted
    Compacted,
}

impl FileStage {
    fn suffix(self) -> &'static str {
        match self {
            FileStage::Live => "",
            FileStage::Temp => ".tmp",
            FileStage::Compacting => ".compacting",
            FileStage::Compacted => ".compacted",
        }
    }
}

/// Locates the files of one table in the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFiles {
    dir: PathBuf,
    seq: u64,
}

impl TableFiles {
    pub fn new(dir: impl Into<PathBuf>, seq: u64) -> Self {
        Self {
            dir: dir.into(),
            seq,
        }
    }

    /// Creation sequence number (higher is newer)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one file of this table
    pub fn path(&self, role: FileRole, stage: FileStage) -> PathBuf {
        self.dir.join(format!(
            "{:020}.{}{}",
            self.seq,
            role.extension(),
            stage.suffix()
        ))
    }

    pub fn data_path(&self) -> PathBuf {
        self.path(FileRole::Data, FileStage::Live)
    }

    pub fn index_path(&self) -> PathBuf {
        self.path(FileRole::Index, FileStage::Live)
    }

    /// Rename both files from one stage to another, index first
    pub fn promote(&self, from: FileStage, to: FileStage) -> Result<()> {
        for role in [FileRole::Index, FileRole::Data] {
            fs::rename(self.path(role, from), self.path(role, to))?;
        }
        sync_dir(&self.dir)?;
        Ok(())
    }

    /// Delete every published or staged file of this table
    ///
    /// Missing files are not an error.
    pub fn remove(&self) -> Result<()> {
        for stage in [
            FileStage::Live,
            FileStage::Compacted,
            FileStage::Compacting,
            FileStage::Temp,
        ] {
            // Data first so a half-removed table is an orphan index
            for role in [FileRole::Data, FileRole::Index] {
                remove_if_exists(&self.path(role, stage))?;
            }
        }
        Ok(())
    }

    /// Best-effort cleanup of one stage after a failed write
    pub(crate) fn discard(&self, stage: FileStage) {
        for role in [FileRole::Data, FileRole::Index] {
            let path = self.path(role, stage);
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Parse a table file name
///
/// "00000000000000000042.index.compacted" → Some((42, Index, Compacted))
pub fn parse_file_name(name: &str) -> Option<(u64, FileRole, FileStage)> {
    let (seq, rest) = name.split_once('.')?;
    if seq.len() != 20 || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seq = seq.parse().ok()?;

    let (role, stage) = match rest.split_once('.') {
        Some((role, stage)) => (role, stage),
        None => (rest, ""),
    };
    let role = match role {
        "data" => FileRole::Data,
        "index" => FileRole::Index,
        _ => return None,
    };
    let stage = match stage {
        "" => FileStage::Live,
        "tmp" => FileStage::Temp,
        "compacting" => FileStage::Compacting,
        "compacted" => FileStage::Compacted,
        _ => return None,
    };
    Some((seq, role, stage))
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Make renames in `dir` durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// SSTable metadata returned by the builder
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Files of this table
    pub files: TableFiles,
    /// Stage the files were left in
    pub stage: FileStage,
    /// Number of entries in this SSTable
    pub entry_count: u64,
    /// Smallest key (for range filtering)
    pub min_key: Option<Bytes>,
    /// Largest key (for range filtering)
    pub max_key: Option<Bytes>,
    /// Data file size in bytes
    pub data_len: u64,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}
