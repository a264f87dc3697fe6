//! Tests for StorageManager
//!
//! These tests verify:
//! - Opening/creating storage directories
//! - Flushing MemTable to SSTable
//! - Discovery of published tables, newest first
//! - Recovery from every crash window of flush and compaction
//! - Rejection of inconsistent or foreign files

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use lsmkv::memtable::MemTable;
use lsmkv::storage::{
    write_table, FileRole, FileStage, SSTableBuilder, SSTableReader, StorageManager, TableFiles,
};
use lsmkv::{Entry, LsmError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn create_memtable_with_entries(entries: &[(&str, &str)]) -> MemTable {
    let memtable = MemTable::new();
    for (key, value) in entries {
        memtable.put(Entry::put(key.to_string(), value.to_string()));
    }
    memtable
}

fn publish(dir: &Path, seq: u64, entries: &[(&str, &str)]) {
    let entries: Vec<Entry> = entries
        .iter()
        .map(|(k, v)| Entry::put(k.to_string(), v.to_string()))
        .collect();
    write_table(TableFiles::new(dir, seq), &entries).unwrap();
}

/// Write a table pair left in `stage`, as a crash would leave it
fn stage_table(dir: &Path, seq: u64, stage: FileStage, entries: &[(&str, &str)]) {
    let mut builder = SSTableBuilder::new(TableFiles::new(dir, seq), stage).unwrap();
    for (k, v) in entries {
        builder.add(&Entry::put(k.to_string(), v.to_string())).unwrap();
    }
    builder.finish().unwrap();
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

fn value_of(tables: &[Arc<SSTableReader>], key: &str) -> Option<Bytes> {
    for table in tables {
        if let Some(entry) = table.get(key.as_bytes()).unwrap() {
            return entry.value.as_bytes().cloned();
        }
    }
    None
}

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("new_storage");

    assert!(!path.exists());

    let (_manager, recovered) = StorageManager::open(&path).unwrap();

    assert!(path.is_dir());
    assert!(recovered.tables.is_empty());
    assert_eq!(recovered.repaired, 0);
}

#[test]
fn test_open_empty_directory_starts_at_seq_one() {
    let temp_dir = TempDir::new().unwrap();

    let (manager, _) = StorageManager::open(temp_dir.path()).unwrap();

    assert_eq!(manager.next_seq(), 1);
    assert_eq!(manager.allocate_seq(), 1);
    assert_eq!(manager.allocate_seq(), 2);
}

#[test]
fn test_open_discovers_tables_newest_first() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 3, &[("k", "three")]);
    publish(temp_dir.path(), 10, &[("k", "ten")]);
    publish(temp_dir.path(), 7, &[("k", "seven")]);

    let (manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![10, 7, 3]);
    assert_eq!(manager.next_seq(), 11);
    assert_eq!(value_of(&recovered.tables, "k"), Some(Bytes::from("ten")));
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_write_memtable() {
    let temp_dir = TempDir::new().unwrap();
    let (manager, _) = StorageManager::open(temp_dir.path()).unwrap();
    let memtable = create_memtable_with_entries(&[("b", "2"), ("a", "1")]);

    let seq = manager.allocate_seq();
    let table = manager.write_memtable(seq, &memtable).unwrap();

    assert_eq!(table.seq(), seq);
    assert_eq!(table.entry_count(), 2);
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["00000000000000000001.data", "00000000000000000001.index"]
    );
}

#[test]
fn test_write_memtable_keeps_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let (manager, _) = StorageManager::open(temp_dir.path()).unwrap();
    let memtable = create_memtable_with_entries(&[("a", "1")]);
    memtable.delete(Bytes::from_static(b"b"));

    let table = manager.write_memtable(manager.allocate_seq(), &memtable).unwrap();

    assert!(table.get(b"b").unwrap().unwrap().is_tombstone());
}

#[test]
fn test_write_empty_memtable_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (manager, _) = StorageManager::open(temp_dir.path()).unwrap();

    let result = manager.write_memtable(manager.allocate_seq(), &MemTable::new());

    assert!(matches!(result, Err(LsmError::Storage(_))));
}

#[test]
fn test_tables_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (manager, _) = StorageManager::open(temp_dir.path()).unwrap();
        let memtable = create_memtable_with_entries(&[("persist", "yes")]);
        manager.write_memtable(manager.allocate_seq(), &memtable).unwrap();
    }

    let (manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    assert_eq!(recovered.tables.len(), 1);
    assert_eq!(manager.next_seq(), 2);
    assert_eq!(value_of(&recovered.tables, "persist"), Some(Bytes::from("yes")));
}

// =============================================================================
// Flush Crash Recovery Tests
// =============================================================================

#[test]
fn test_recovery_removes_temp_files() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    stage_table(temp_dir.path(), 2, FileStage::Temp, &[("a", "2")]);

    let (manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    assert_eq!(recovered.tables.len(), 1);
    assert_eq!(recovered.repaired, 2);
    assert_eq!(value_of(&recovered.tables, "a"), Some(Bytes::from("1")));
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["00000000000000000001.data", "00000000000000000001.index"]
    );
    // Sequence numbers of discarded output are not reused
    assert_eq!(manager.next_seq(), 3);
}

#[test]
fn test_recovery_removes_index_without_data() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    // Crash between the index rename and the data rename
    stage_table(temp_dir.path(), 2, FileStage::Temp, &[("a", "2")]);
    let files = TableFiles::new(temp_dir.path(), 2);
    fs::rename(
        files.path(FileRole::Index, FileStage::Temp),
        files.path(FileRole::Index, FileStage::Live),
    )
    .unwrap();

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    assert_eq!(recovered.tables.len(), 1);
    assert_eq!(value_of(&recovered.tables, "a"), Some(Bytes::from("1")));
    assert!(!files.index_path().exists());
    assert!(!files.path(FileRole::Data, FileStage::Temp).exists());
}

#[test]
fn test_data_without_index_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    fs::remove_file(TableFiles::new(temp_dir.path(), 1).index_path()).unwrap();

    let err = StorageManager::open(temp_dir.path()).err().unwrap();

    assert!(err.is_corruption());
}

#[test]
fn test_unexpected_file_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();

    let err = StorageManager::open(temp_dir.path()).err().unwrap();

    assert!(matches!(err, LsmError::Corruption { .. }));
}

// =============================================================================
// Compaction Crash Recovery Tests
// =============================================================================

#[test]
fn test_recovery_discards_unfinished_compaction() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "old")]);
    publish(temp_dir.path(), 2, &[("a", "new")]);
    stage_table(temp_dir.path(), 3, FileStage::Compacting, &[("a", "new")]);

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![2, 1]);
    assert_eq!(value_of(&recovered.tables, "a"), Some(Bytes::from("new")));
}

#[test]
fn test_recovery_finishes_committed_compaction() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "old"), ("gone", "x")]);
    publish(temp_dir.path(), 2, &[("a", "new")]);
    // Output reached its commit point, inputs not yet deleted
    stage_table(temp_dir.path(), 3, FileStage::Compacted, &[("a", "new")]);

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![3]);
    assert_eq!(value_of(&recovered.tables, "gone"), None);
    assert_eq!(
        file_names(temp_dir.path()),
        vec!["00000000000000000003.data", "00000000000000000003.index"]
    );
}

#[test]
fn test_recovery_keeps_tables_newer_than_compaction() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "old")]);
    publish(temp_dir.path(), 2, &[("a", "mid")]);
    stage_table(temp_dir.path(), 3, FileStage::Compacted, &[("a", "mid")]);
    // Flushed while the compaction ran
    publish(temp_dir.path(), 4, &[("a", "newest")]);

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![4, 3]);
    assert_eq!(value_of(&recovered.tables, "a"), Some(Bytes::from("newest")));
}

#[test]
fn test_recovery_after_partial_promotion() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    stage_table(temp_dir.path(), 2, FileStage::Compacted, &[("a", "1")]);
    // Crash between the index and data renames of the final promotion
    let files = TableFiles::new(temp_dir.path(), 2);
    fs::rename(
        files.path(FileRole::Index, FileStage::Compacted),
        files.index_path(),
    )
    .unwrap();

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![2]);
    assert!(files.data_path().exists());
    assert!(files.index_path().exists());
}

#[test]
fn test_recovery_removes_orphan_compacted_index() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    publish(temp_dir.path(), 2, &[("b", "2")]);
    // Crash after the index reached `.compacted` but before the data did
    stage_table(temp_dir.path(), 3, FileStage::Compacting, &[("a", "1"), ("b", "2")]);
    let files = TableFiles::new(temp_dir.path(), 3);
    fs::rename(
        files.path(FileRole::Index, FileStage::Compacting),
        files.path(FileRole::Index, FileStage::Compacted),
    )
    .unwrap();

    let (_manager, recovered) = StorageManager::open(temp_dir.path()).unwrap();

    let seqs: Vec<u64> = recovered.tables.iter().map(|t| t.seq()).collect();
    assert_eq!(seqs, vec![2, 1]);
    assert_eq!(file_names(temp_dir.path()).len(), 4);
}

#[test]
fn test_recovery_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    publish(temp_dir.path(), 1, &[("a", "1")]);
    stage_table(temp_dir.path(), 2, FileStage::Compacted, &[("a", "1")]);

    let (_, first) = StorageManager::open(temp_dir.path()).unwrap();
    let names = file_names(temp_dir.path());
    drop(first);
    let (_, second) = StorageManager::open(temp_dir.path()).unwrap();

    assert_eq!(second.repaired, 0);
    assert_eq!(file_names(temp_dir.path()), names);
}
