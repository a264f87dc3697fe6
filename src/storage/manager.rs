//! Storage Manager
//!
//! Owns the table directory and its naming.
//!
//! ## Responsibilities
//! - Recover from crash artifacts on startup
//! - Discover published SSTables, newest first
//! - Hand out monotonically increasing sequence numbers
//! - Write a frozen MemTable as a new published SSTable

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{LsmError, Result};
use crate::memtable::MemTable;

use super::sstable::{
    parse_file_name, remove_if_exists, sync_dir, write_table, FileRole, FileStage, SSTableReader,
    TableFiles,
};

/// Manages the storage directory
///
/// ## Concurrency:
/// - `next_seq`: Atomic counter (lock-free)
/// - `publish_lock`: held by the flush worker from sequence allocation until
///   its table is installed, and by the compactor while it snapshots the
///   table set, so every table with a lower sequence than a compaction's
///   output is part of that compaction
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Next sequence number for a new SSTable
    next_seq: AtomicU64,

    publish_lock: Mutex<()>,
}

/// Result of scanning the directory at startup
pub struct Recovered {
    /// Published tables, newest first
    pub tables: Vec<Arc<SSTableReader>>,

    /// Number of crash artifacts removed or promoted
    pub repaired: usize,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Delete unpublished flush output (`.tmp`) and unfinished
    ///    compaction output (`.compacting`)
    /// 3. Finish any compaction that reached its `.compacted` marker
    /// 4. Discard index files whose data file was never published
    /// 5. Open every complete pair, newest first
    pub fn open(path: &Path) -> Result<(Self, Recovered)> {
        fs::create_dir_all(path)?;

        let mut files = scan_dir(path)?;
        let max_seq = files.iter().map(|(seq, _, _)| *seq).max().unwrap_or(0);
        let mut repaired = 0;

        // Step 2: staging files that never reached a commit point
        let staged: Vec<_> = files
            .iter()
            .filter(|(_, _, stage)| matches!(stage, FileStage::Temp | FileStage::Compacting))
            .copied()
            .collect();
        for (seq, role, stage) in staged {
            let file = TableFiles::new(path, seq).path(role, stage);
            tracing::warn!("Removing unpublished table file {}", file.display());
            remove_if_exists(&file)?;
            files.remove(&(seq, role, stage));
            repaired += 1;
        }

        // Step 3: finished compactions
        let markers: Vec<u64> = files
            .iter()
            .filter(|(_, role, stage)| *role == FileRole::Data && *stage == FileStage::Compacted)
            .map(|(seq, _, _)| *seq)
            .collect();
        for seq in markers {
            repaired += finish_compaction(path, seq, &mut files)?;
        }

        // Index half of a compaction that crashed before its data marker
        let orphans: Vec<_> = files
            .iter()
            .filter(|(_, _, stage)| *stage == FileStage::Compacted)
            .copied()
            .collect();
        for (seq, role, stage) in orphans {
            let file = TableFiles::new(path, seq).path(role, stage);
            tracing::warn!("Removing incomplete compaction output {}", file.display());
            remove_if_exists(&file)?;
            files.remove(&(seq, role, stage));
            repaired += 1;
        }

        // Steps 4-5: pair up published files
        let mut pairs: BTreeMap<u64, (bool, bool)> = BTreeMap::new();
        for (seq, role, _) in &files {
            let pair = pairs.entry(*seq).or_default();
            match role {
                FileRole::Data => pair.0 = true,
                FileRole::Index => pair.1 = true,
            }
        }

        let mut tables = Vec::with_capacity(pairs.len());
        for (seq, (has_data, has_index)) in pairs.into_iter().rev() {
            let table_files = TableFiles::new(path, seq);
            match (has_data, has_index) {
                (true, true) => {
                    let reader = SSTableReader::open(&table_files, FileStage::Live)?;
                    tables.push(Arc::new(reader));
                }
                (false, true) => {
                    // Publication renames the index first; the data file never followed
                    tracing::warn!(
                        "Removing index {} of unpublished table",
                        table_files.index_path().display()
                    );
                    remove_if_exists(&table_files.index_path())?;
                    repaired += 1;
                }
                (true, false) => {
                    return Err(LsmError::corruption(
                        table_files.data_path(),
                        format!(
                            "data file has no index {}",
                            table_files.index_path().display()
                        ),
                    ));
                }
                (false, false) => {}
            }
        }

        if repaired > 0 {
            sync_dir(path)?;
        }

        tracing::info!(
            "Opened storage at {}: {} tables, {} crash artifacts repaired",
            path.display(),
            tables.len(),
            repaired
        );

        let manager = Self {
            data_dir: path.to_path_buf(),
            next_seq: AtomicU64::new(max_seq + 1),
            publish_lock: Mutex::new(()),
        };

        Ok((manager, Recovered { tables, repaired }))
    }

    /// Allocate the sequence number of a new table
    pub fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Serializes table publication against compaction snapshots
    pub fn publish_lock(&self) -> MutexGuard<'_, ()> {
        self.publish_lock.lock()
    }

    /// Files of the table with the given sequence number
    pub fn files(&self, seq: u64) -> TableFiles {
        TableFiles::new(&self.data_dir, seq)
    }

    /// Flush a frozen MemTable to a new published SSTable
    pub fn write_memtable(&self, seq: u64, memtable: &MemTable) -> Result<Arc<SSTableReader>> {
        if memtable.is_empty() {
            return Err(LsmError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let files = self.files(seq);
        let metadata = write_table(files.clone(), &memtable.entries())?;
        let reader = SSTableReader::open(&files, FileStage::Live)?;

        tracing::debug!(
            "Wrote SSTable {} ({} entries, {} bytes)",
            seq,
            metadata.entry_count,
            metadata.data_len
        );

        Ok(Arc::new(reader))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next sequence number (for testing/debugging)
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }
}

type FileSet = BTreeSet<(u64, FileRole, FileStage)>;

/// List table files, failing on anything else in the directory
fn scan_dir(path: &Path) -> Result<FileSet> {
    let mut files = BTreeSet::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();

        let parsed = entry
            .file_name()
            .to_str()
            .and_then(parse_file_name)
            .filter(|_| file_path.is_file());

        match parsed {
            Some(file) => {
                files.insert(file);
            }
            None => {
                return Err(LsmError::corruption(
                    file_path,
                    "unexpected file in table directory",
                ));
            }
        }
    }
    Ok(files)
}

/// Complete a compaction whose output reached the `.compacted` marker
///
/// Every live table older than the output was an input of that compaction.
fn finish_compaction(path: &Path, seq: u64, files: &mut FileSet) -> Result<usize> {
    let output = TableFiles::new(path, seq);
    let mut repaired = 0;

    let has_index = files.contains(&(seq, FileRole::Index, FileStage::Compacted))
        || files.contains(&(seq, FileRole::Index, FileStage::Live));
    if !has_index {
        return Err(LsmError::corruption(
            output.path(FileRole::Data, FileStage::Compacted),
            "compacted data file has no index",
        ));
    }

    let inputs: Vec<_> = files
        .iter()
        .filter(|(s, _, stage)| *s < seq && *stage == FileStage::Live)
        .copied()
        .collect();
    for (input_seq, role, stage) in inputs {
        let file = TableFiles::new(path, input_seq).path(role, stage);
        remove_if_exists(&file)?;
        files.remove(&(input_seq, role, stage));
        repaired += 1;
    }

    for role in [FileRole::Index, FileRole::Data] {
        if files.remove(&(seq, role, FileStage::Compacted)) {
            fs::rename(
                output.path(role, FileStage::Compacted),
                output.path(role, FileStage::Live),
            )?;
            files.insert((seq, role, FileStage::Live));
            repaired += 1;
        }
    }

    tracing::warn!(
        "Finished interrupted compaction into table {} ({} files touched)",
        seq,
        repaired
    );
    Ok(repaired)
}
