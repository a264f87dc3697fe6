//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::entry::{Entry, Value};
use crate::key;

/// In-memory table for recent writes
///
/// All methods take `&self`; the map is guarded by an internal RwLock so a
/// single table can be shared behind an `Arc` between writers, readers and
/// the flush worker.
pub struct MemTable {
    /// Sorted entries, at most one per key
    data: RwLock<BTreeMap<Bytes, Value>>,

    /// Key + value bytes of the live map contents
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get the entry stored for a key (may be a tombstone)
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Insert or overwrite an entry
    ///
    /// Returns the memtable size after the write.
    pub fn put(&self, entry: Entry) -> usize {
        let added = entry.key.len() + entry.value.len();
        let mut data = self.data.write();

        let removed = match data.insert(entry.key.clone(), entry.value) {
            Some(old) => entry.key.len() + old.len(),
            None => 0,
        };

        // Updated under the map lock so size never lags a visible write
        if added >= removed {
            self.size.fetch_add(added - removed, Ordering::SeqCst) + (added - removed)
        } else {
            self.size.fetch_sub(removed - added, Ordering::SeqCst) - (removed - added)
        }
    }

    /// Insert a tombstone for a key
    pub fn delete(&self, key: impl Into<Bytes>) -> usize {
        self.put(Entry::tombstone(key))
    }

    /// Entries with keys in `[from, to)` in ascending order, tombstones included
    ///
    /// The result is a snapshot; later writes to this table are not seen.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Vec<Entry> {
        if let (Some(f), Some(t)) = (from, to) {
            if key::compare(f, t) != std::cmp::Ordering::Less {
                return Vec::new();
            }
        }

        let lower = from.map_or(Bound::Unbounded, Bound::Included);
        let upper = to.map_or(Bound::Unbounded, Bound::Excluded);

        self.data
            .read()
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect()
    }

    /// Every entry in ascending key order (used by flush)
    pub fn entries(&self) -> Vec<Entry> {
        self.range(None, None)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if the table has reached the flush threshold
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
