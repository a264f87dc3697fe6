//! Iterator Module
//!
//! Composable sorted-entry streams.
//!
//! Every source (memtable snapshot, SSTable range) is adapted into an
//! [`EntrySource`], a peekable cursor with two operations. [`MergeIterator`]
//! combines any number of sources into one stream of unique keys, newest
//! version first, and [`LiveEntries`] drops tombstones from any stream.
//!
//! ```text
//!   memtable ──► PeekableSource ─┐
//!   memtable ──► PeekableSource ─┼─► MergeIterator ──► LiveEntries ──► caller
//!   sstable  ──► PeekableSource ─┘        (raw)        (no tombstones)
//! ```

mod filter;
mod merge;

use crate::entry::Entry;
use crate::error::{LsmError, Result};

pub use filter::LiveEntries;
pub use merge::MergeIterator;

/// A sorted stream of entries that can be inspected before it is consumed
pub trait EntrySource: Send {
    /// The current entry, `None` once exhausted
    fn peek(&self) -> Option<&Entry>;

    /// Move past the current entry
    fn advance(&mut self) -> Result<()>;
}

/// Boxed source, as stored by [`MergeIterator`]
pub type BoxedSource = Box<dyn EntrySource>;

/// Adapts a fallible iterator of sorted entries into an [`EntrySource`]
pub struct PeekableSource<I> {
    iter: I,
    head: Option<Entry>,
}

impl<I> PeekableSource<I>
where
    I: Iterator<Item = Result<Entry>> + Send,
{
    /// Wrap `iter`, reading its first entry
    pub fn new(mut iter: I) -> Result<Self> {
        let head = iter.next().transpose()?;
        Ok(Self { iter, head })
    }
}

impl<I> EntrySource for PeekableSource<I>
where
    I: Iterator<Item = Result<Entry>> + Send,
{
    fn peek(&self) -> Option<&Entry> {
        self.head.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        self.head = self.iter.next().transpose()?;
        Ok(())
    }
}

/// Source over entries already held in memory
pub fn from_entries(entries: Vec<Entry>) -> BoxedSource {
    let mut iter = entries.into_iter().map(Ok::<Entry, LsmError>);
    let head = iter.next().and_then(|entry| entry.ok());
    Box::new(PeekableSource { iter, head })
}

/// Box any fallible sorted iterator as a source
pub fn boxed<I>(iter: I) -> Result<BoxedSource>
where
    I: Iterator<Item = Result<Entry>> + Send + 'static,
{
    Ok(Box::new(PeekableSource::new(iter)?))
}
