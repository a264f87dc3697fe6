//! Tests for SSTable
//!
//! These tests verify:
//! - Writing and reading back a table pair
//! - Point lookups via binary search, tombstones included
//! - Half-open range scans
//! - File naming and staging
//! - Rejection of unsorted input and corrupt files

use std::fs;
use std::sync::Arc;

use bytes::Bytes;
use lsmkv::storage::sstable::parse_file_name;
use lsmkv::storage::{
    write_table, FileRole, FileStage, SSTableBuilder, SSTableReader, TableFiles,
};
use lsmkv::{Entry, LsmError, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn entries(pairs: &[(&str, Option<&str>)]) -> Vec<Entry> {
    pairs
        .iter()
        .map(|(k, v)| match v {
            Some(v) => Entry::put(k.to_string(), v.to_string()),
            None => Entry::tombstone(k.to_string()),
        })
        .collect()
}

fn write_and_open(dir: &TempDir, seq: u64, pairs: &[(&str, Option<&str>)]) -> Arc<SSTableReader> {
    let files = TableFiles::new(dir.path(), seq);
    write_table(files.clone(), &entries(pairs)).unwrap();
    Arc::new(SSTableReader::open(&files, FileStage::Live).unwrap())
}

fn keys_of(reader: &Arc<SSTableReader>, from: Option<&str>, to: Option<&str>) -> Vec<String> {
    reader
        .range(from.map(str::as_bytes), to.map(str::as_bytes))
        .unwrap()
        .map(|e| String::from_utf8(e.unwrap().key.to_vec()).unwrap())
        .collect()
}

// =============================================================================
// Write Tests
// =============================================================================

#[test]
fn test_write_table_publishes_pair() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 7);

    let table = write_table(files.clone(), &entries(&[("a", Some("1")), ("b", Some("2"))])).unwrap();

    assert_eq!(table.entry_count(), 2);
    assert_eq!(table.stage, FileStage::Live);
    assert!(files.data_path().exists());
    assert!(files.index_path().exists());
    assert!(!files.path(FileRole::Data, FileStage::Temp).exists());
    assert!(!files.path(FileRole::Index, FileStage::Temp).exists());
}

#[test]
fn test_file_layout_matches_record_format() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);

    write_table(files.clone(), &entries(&[("ab", Some("xyz")), ("c", None)])).unwrap();

    let data = fs::read(files.data_path()).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&2u64.to_le_bytes());
    expected.extend_from_slice(b"ab");
    expected.extend_from_slice(&3i64.to_le_bytes());
    expected.extend_from_slice(b"xyz");
    expected.extend_from_slice(&1u64.to_le_bytes());
    expected.extend_from_slice(b"c");
    expected.extend_from_slice(&(-1i64).to_le_bytes());
    assert_eq!(data, expected);

    let index = fs::read(files.index_path()).unwrap();
    let mut expected_index = Vec::new();
    expected_index.extend_from_slice(&0u64.to_le_bytes());
    expected_index.extend_from_slice(&21u64.to_le_bytes());
    assert_eq!(index, expected_index);
}

#[test]
fn test_file_names_are_zero_padded() {
    let files = TableFiles::new("/tmp/db", 42);

    assert_eq!(
        files.data_path().file_name().unwrap().to_str().unwrap(),
        "00000000000000000042.data"
    );
    assert_eq!(
        files
            .path(FileRole::Index, FileStage::Compacted)
            .file_name()
            .unwrap()
            .to_str()
            .unwrap(),
        "00000000000000000042.index.compacted"
    );
}

#[test]
fn test_parse_file_name() {
    assert_eq!(
        parse_file_name("00000000000000000042.data"),
        Some((42, FileRole::Data, FileStage::Live))
    );
    assert_eq!(
        parse_file_name("00000000000000000003.index.tmp"),
        Some((3, FileRole::Index, FileStage::Temp))
    );
    assert_eq!(
        parse_file_name("00000000000000000009.data.compacting"),
        Some((9, FileRole::Data, FileStage::Compacting))
    );
    assert_eq!(parse_file_name("42.data"), None);
    assert_eq!(parse_file_name("00000000000000000042.log"), None);
    assert_eq!(parse_file_name("00000000000000000042.data.bak"), None);
    assert_eq!(parse_file_name("notes.txt"), None);
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    let mut builder = SSTableBuilder::new(files, FileStage::Temp).unwrap();

    builder.add(&Entry::put(&b"b"[..], &b"2"[..])).unwrap();
    let result = builder.add(&Entry::put(&b"a"[..], &b"1"[..]));

    assert!(matches!(result, Err(LsmError::Storage(_))));
}

#[test]
fn test_builder_rejects_duplicate_keys() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    let mut builder = SSTableBuilder::new(files, FileStage::Temp).unwrap();

    builder.add(&Entry::put(&b"a"[..], &b"1"[..])).unwrap();
    let result = builder.add(&Entry::put(&b"a"[..], &b"2"[..]));

    assert!(matches!(result, Err(LsmError::Storage(_))));
}

#[test]
fn test_failed_write_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);

    let unsorted = entries(&[("b", Some("2")), ("a", Some("1"))]);
    assert!(write_table(files, &unsorted).is_err());

    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

// =============================================================================
// Point Lookup Tests
// =============================================================================

#[test]
fn test_get_existing_keys() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(
        &dir,
        1,
        &[("apple", Some("red")), ("banana", Some("yellow")), ("cherry", Some("dark"))],
    );

    for (key, value) in [("apple", "red"), ("banana", "yellow"), ("cherry", "dark")] {
        let entry = reader.get(key.as_bytes()).unwrap().unwrap();
        assert_eq!(entry.value, Value::Put(Bytes::from(value)));
    }
}

#[test]
fn test_get_missing_keys() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("b", Some("1")), ("d", Some("2"))]);

    assert!(reader.get(b"a").unwrap().is_none());
    assert!(reader.get(b"c").unwrap().is_none());
    assert!(reader.get(b"e").unwrap().is_none());
    assert!(reader.get(b"bb").unwrap().is_none());
}

#[test]
fn test_get_returns_tombstone() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("a", Some("1")), ("gone", None)]);

    let entry = reader.get(b"gone").unwrap().unwrap();
    assert!(entry.is_tombstone());
}

#[test]
fn test_get_empty_key_and_value() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("", Some("")), ("a", Some("1"))]);

    let entry = reader.get(b"").unwrap().unwrap();
    assert_eq!(entry.value, Value::Put(Bytes::new()));
}

#[test]
fn test_get_binary_keys_in_unsigned_order() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    let table = vec![
        Entry::put(vec![0x00u8], &b"zero"[..]),
        Entry::put(vec![0x7fu8], &b"low"[..]),
        Entry::put(vec![0x80u8], &b"high"[..]),
        Entry::put(vec![0xffu8, 0x00], &b"top"[..]),
    ];
    write_table(files.clone(), &table).unwrap();
    let reader = SSTableReader::open(&files, FileStage::Live).unwrap();

    assert_eq!(reader.entry_count(), 4);
    for entry in &table {
        assert_eq!(reader.get(&entry.key).unwrap().as_ref(), Some(entry));
    }
}

#[test]
fn test_min_max_keys() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("b", Some("1")), ("m", Some("2")), ("x", Some("3"))]);

    assert_eq!(reader.min_key().map(|k| k.as_ref()), Some(&b"b"[..]));
    assert_eq!(reader.max_key().map(|k| k.as_ref()), Some(&b"x"[..]));
    assert!(reader.might_contain(b"c"));
    assert!(!reader.might_contain(b"a"));
    assert!(!reader.might_contain(b"y"));
}

#[test]
fn test_many_entries() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    let table: Vec<Entry> = (0..1000)
        .map(|i| Entry::put(format!("key{:05}", i), format!("value{}", i)))
        .collect();
    write_table(files.clone(), &table).unwrap();
    let reader = SSTableReader::open(&files, FileStage::Live).unwrap();

    for i in (0..1000).step_by(37) {
        let key = format!("key{:05}", i);
        let entry = reader.get(key.as_bytes()).unwrap().unwrap();
        assert_eq!(entry.value, Value::Put(Bytes::from(format!("value{}", i))));
    }
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_range_is_half_open() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(
        &dir,
        1,
        &[("a", Some("1")), ("b", Some("2")), ("c", Some("3")), ("d", Some("4"))],
    );

    assert_eq!(keys_of(&reader, Some("b"), Some("d")), vec!["b", "c"]);
    assert_eq!(keys_of(&reader, Some("bb"), Some("dd")), vec!["c", "d"]);
}

#[test]
fn test_range_unbounded() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))]);

    assert_eq!(keys_of(&reader, None, None), vec!["a", "b", "c"]);
    assert_eq!(keys_of(&reader, None, Some("b")), vec!["a"]);
    assert_eq!(keys_of(&reader, Some("b"), None), vec!["b", "c"]);
}

#[test]
fn test_range_empty_cases() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("b", Some("1")), ("c", Some("2"))]);

    assert!(keys_of(&reader, Some("c"), Some("b")).is_empty());
    assert!(keys_of(&reader, Some("b"), Some("b")).is_empty());
    assert!(keys_of(&reader, Some("x"), None).is_empty());
    assert!(keys_of(&reader, None, Some("a")).is_empty());
}

#[test]
fn test_range_includes_tombstones() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("a", Some("1")), ("b", None), ("c", Some("3"))]);

    let scanned: Vec<Entry> = reader.iter().map(|e| e.unwrap()).collect();
    assert_eq!(scanned.len(), 3);
    assert!(scanned[1].is_tombstone());
}

#[test]
fn test_iterator_outlives_reader_handle() {
    let dir = TempDir::new().unwrap();
    let reader = write_and_open(&dir, 1, &[("a", Some("1")), ("b", Some("2"))]);

    let iter = reader.iter();
    drop(reader);

    assert_eq!(iter.count(), 2);
}

#[test]
fn test_empty_table() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);

    write_table(files.clone(), &[]).unwrap();
    let reader = Arc::new(SSTableReader::open(&files, FileStage::Live).unwrap());

    assert_eq!(reader.entry_count(), 0);
    assert!(reader.get(b"a").unwrap().is_none());
    assert_eq!(reader.iter().count(), 0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_open_rejects_ragged_index() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    write_table(files.clone(), &entries(&[("a", Some("1"))])).unwrap();

    fs::write(files.index_path(), [0u8; 7]).unwrap();

    let err = SSTableReader::open(&files, FileStage::Live).err().unwrap();
    assert!(err.is_corruption());
}

#[test]
fn test_open_rejects_offset_past_data() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    write_table(files.clone(), &entries(&[("a", Some("1"))])).unwrap();

    let mut index = fs::read(files.index_path()).unwrap();
    index.extend_from_slice(&1000u64.to_le_bytes());
    fs::write(files.index_path(), index).unwrap();

    let err = SSTableReader::open(&files, FileStage::Live).err().unwrap();
    assert!(err.is_corruption());
}

#[test]
fn test_truncated_record_is_corruption() {
    let dir = TempDir::new().unwrap();
    let files = TableFiles::new(dir.path(), 1);
    write_table(files.clone(), &entries(&[("a", Some("1")), ("b", Some("22"))])).unwrap();

    let mut data = fs::read(files.data_path()).unwrap();
    data.pop();
    fs::write(files.data_path(), data).unwrap();

    let reader = SSTableReader::open(&files, FileStage::Live).unwrap();
    let err = reader.get(b"b").err().unwrap();
    assert!(err.is_corruption());
}
