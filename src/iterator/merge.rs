//! K-way merge over entry sources.
//!
//! Produces entries in ascending key order. When the same key appears in
//! several sources only the version from the most recent source is emitted
//! (sources are ranked by position: index 0 is the newest).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::entry::Entry;
use crate::error::Result;
use crate::key;

use super::BoxedSource;

/// The current key of one source, used for heap ordering.
struct HeapEntry {
    key: Bytes,
    /// Index into `sources`; lower is more recent.
    rank: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse both comparisons so the smallest
        // key, and among equal keys the most recent source, pops first.
        key::compare(&other.key, &self.key).then_with(|| other.rank.cmp(&self.rank))
    }
}

/// Merges sorted sources into one stream of unique keys, newest version wins.
///
/// Tombstones are emitted like any other entry; wrap the merge in
/// [`super::LiveEntries`] for ordinary reads. The iterator is lazy and
/// forward-only, and stops after the first error.
pub struct MergeIterator {
    sources: Vec<BoxedSource>,
    heap: BinaryHeap<HeapEntry>,
    failed: bool,
}

impl MergeIterator {
    /// Creates a merge over `sources`, ordered newest first.
    pub fn new(sources: Vec<BoxedSource>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (rank, source) in sources.iter().enumerate() {
            if let Some(entry) = source.peek() {
                heap.push(HeapEntry {
                    key: entry.key.clone(),
                    rank,
                });
            }
        }

        Self {
            sources,
            heap,
            failed: false,
        }
    }

    /// Number of merged sources
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Advance one source and put it back on the heap if it has more data.
    fn advance_source(&mut self, rank: usize) -> Result<()> {
        let source = &mut self.sources[rank];
        source.advance()?;
        if let Some(entry) = source.peek() {
            self.heap.push(HeapEntry {
                key: entry.key.clone(),
                rank,
            });
        }
        Ok(())
    }

    /// Returns the next entry, or `None` when all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let top = match self.heap.pop() {
            Some(top) => top,
            None => return Ok(None),
        };

        let entry = match self.sources[top.rank].peek() {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        self.advance_source(top.rank)?;

        // Every other source positioned on the same key holds a stale
        // version; skip past it.
        while let Some(dup) = self.heap.peek() {
            if dup.key != entry.key {
                break;
            }
            let rank = dup.rank;
            self.heap.pop();
            self.advance_source(rank)?;
        }

        Ok(Some(entry))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
