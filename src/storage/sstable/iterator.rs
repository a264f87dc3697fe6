//! SSTable Iterator
//!
//! Positional iteration over a slice of an SSTable's index.

use std::sync::Arc;

use crate::entry::Entry;
use crate::error::Result;

use super::SSTableReader;

/// Iterator over SSTable entries in sorted key order
///
/// Holds its table alive, so it stays valid after the table is dropped from
/// the engine's table set.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    /// Next record to yield
    pos: usize,
    /// One past the last record to yield
    end: usize,
}

impl SSTableIterator {
    pub(super) fn new(table: Arc<SSTableReader>, pos: usize, end: usize) -> Self {
        Self { table, pos, end }
    }

    /// Records left to yield
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let item = self.table.entry_at(self.pos);
        // Stop after a decoding error
        self.pos = if item.is_ok() { self.pos + 1 } else { self.end };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
