//! SSTable Reader
//!
//! Memory-maps a published table and serves O(log n) lookups by binary
//! searching the offset index.

use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::entry::{Entry, Value, KEY_LEN_SIZE, TOMBSTONE_MARKER, VALUE_LEN_SIZE};
use crate::error::{LsmError, Result};
use crate::key;

use super::iterator::SSTableIterator;
use super::{FileRole, FileStage, TableFiles, OFFSET_SIZE};

/// Reader for one SSTable file pair
///
/// Both files are mapped read-only. Keys and values handed out are slices of
/// the mapping and keep it alive; the mapping is released once the reader
/// and every slice taken from it are dropped.
pub struct SSTableReader {
    files: TableFiles,
    /// Path of the data file as opened (for diagnostics)
    data_path: PathBuf,
    data: Bytes,
    index: Bytes,
    entry_count: usize,
    min_key: Option<Bytes>,
    max_key: Option<Bytes>,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Validates the shape of the index; individual records are validated
    /// as they are decoded.
    pub fn open(files: &TableFiles, stage: FileStage) -> Result<Self> {
        let data_path = files.path(FileRole::Data, stage);
        let index_path = files.path(FileRole::Index, stage);

        let data = map_file(&data_path)?;
        let index = map_file(&index_path)?;

        if index.len() % OFFSET_SIZE != 0 {
            return Err(LsmError::corruption(
                &index_path,
                format!("index length {} is not a multiple of {}", index.len(), OFFSET_SIZE),
            ));
        }

        let mut reader = Self {
            files: files.clone(),
            data_path,
            data,
            index,
            entry_count: 0,
            min_key: None,
            max_key: None,
        };
        reader.entry_count = reader.index.len() / OFFSET_SIZE;
        reader.validate_offsets(&index_path)?;

        if reader.entry_count > 0 {
            reader.min_key = Some(reader.key_at(0)?);
            reader.max_key = Some(reader.key_at(reader.entry_count - 1)?);
        }

        tracing::debug!(
            "Opened SSTable {} ({} entries, {} bytes)",
            files.seq(),
            reader.entry_count,
            reader.data.len()
        );

        Ok(reader)
    }

    fn validate_offsets(&self, index_path: &Path) -> Result<()> {
        if self.entry_count == 0 {
            if !self.data.is_empty() {
                return Err(LsmError::corruption(
                    index_path,
                    "empty index for a non-empty data file",
                ));
            }
            return Ok(());
        }

        let mut previous = None;
        for i in 0..self.entry_count {
            let offset = self.offset(i);
            let ok = match previous {
                None => offset == 0,
                Some(p) => offset > p,
            };
            if !ok || offset >= self.data.len() {
                return Err(LsmError::corruption(
                    index_path,
                    format!("index slot {} holds invalid offset {}", i, offset),
                ));
            }
            previous = Some(offset);
        }
        Ok(())
    }

    /// Data file offset of record `i`
    fn offset(&self, i: usize) -> usize {
        let start = i * OFFSET_SIZE;
        let mut buf = [0u8; OFFSET_SIZE];
        buf.copy_from_slice(&self.index[start..start + OFFSET_SIZE]);
        u64::from_le_bytes(buf) as usize
    }

    /// Byte range `[start, end)` of record `i` in the data file
    fn record_bounds(&self, i: usize) -> (usize, usize) {
        let end = if i + 1 < self.entry_count {
            self.offset(i + 1)
        } else {
            self.data.len()
        };
        (self.offset(i), end)
    }

    fn corrupt(&self, i: usize, reason: &str) -> LsmError {
        LsmError::corruption(&self.data_path, format!("record {}: {}", i, reason))
    }

    /// Key of record `i` (zero-copy)
    pub(super) fn key_at(&self, i: usize) -> Result<Bytes> {
        let (start, end) = self.record_bounds(i);
        let key_start = start + KEY_LEN_SIZE;
        if key_start > end {
            return Err(self.corrupt(i, "truncated key length"));
        }
        let key_len = read_u64(&self.data[start..key_start]) as usize;
        match key_start.checked_add(key_len) {
            Some(key_end) if key_end <= end => Ok(self.data.slice(key_start..key_end)),
            _ => Err(self.corrupt(i, "key overruns record")),
        }
    }

    /// Decode record `i` (zero-copy)
    pub(super) fn entry_at(&self, i: usize) -> Result<Entry> {
        let (start, end) = self.record_bounds(i);
        let key = self.key_at(i)?;

        let len_start = start + KEY_LEN_SIZE + key.len();
        let value_start = len_start + VALUE_LEN_SIZE;
        if value_start > end {
            return Err(self.corrupt(i, "truncated value length"));
        }

        let value_len = read_u64(&self.data[len_start..value_start]) as i64;
        let value = if value_len == TOMBSTONE_MARKER {
            if value_start != end {
                return Err(self.corrupt(i, "tombstone followed by value bytes"));
            }
            Value::Tombstone
        } else if value_len < 0 || value_start.checked_add(value_len as usize) != Some(end) {
            return Err(self.corrupt(i, "value length does not match record size"));
        } else {
            Value::Put(self.data.slice(value_start..end))
        };

        Ok(Entry { key, value })
    }

    /// Index of the first record whose key is >= `target`
    pub(super) fn lower_bound(&self, target: &[u8]) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if key::compare(&self.key_at(mid)?, target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Point lookup, O(log n) via binary search over the index
    ///
    /// Returns the raw entry, which may be a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }
        let i = self.lower_bound(key)?;
        if i < self.entry_count && self.key_at(i)? == key {
            return self.entry_at(i).map(Some);
        }
        Ok(None)
    }

    /// Lazily iterate the entries with keys in `[from, to)`
    ///
    /// `None` leaves that side unbounded. Tombstones are included.
    pub fn range(
        self: &Arc<Self>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<SSTableIterator> {
        let start = match from {
            Some(f) => self.lower_bound(f)?,
            None => 0,
        };
        let end = match to {
            Some(t) => self.lower_bound(t)?,
            None => self.entry_count,
        };
        Ok(SSTableIterator::new(Arc::clone(self), start, end.max(start)))
    }

    /// Iterate over all entries (used by compaction)
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), 0, self.entry_count)
    }

    /// Quick check if a key might be in this SSTable (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => {
                key::compare(key, min) != Ordering::Less
                    && key::compare(key, max) != Ordering::Greater
            }
            _ => false,
        }
    }

    /// Creation sequence number
    pub fn seq(&self) -> u64 {
        self.files.seq()
    }

    pub fn files(&self) -> &TableFiles {
        &self.files
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn min_key(&self) -> Option<&Bytes> {
        self.min_key.as_ref()
    }

    pub fn max_key(&self) -> Option<&Bytes> {
        self.max_key.as_ref()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Map a file read-only as shared bytes
fn map_file(path: &Path) -> Result<Bytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Bytes::new());
    }
    // SAFETY: table files are never written after publication and no other
    // process opens them for writing while the engine is live.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Bytes::from_owner(mmap))
}
