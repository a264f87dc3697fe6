//! Tombstone filter

use crate::entry::Entry;
use crate::error::Result;

/// Drops tombstones from a stream of entries
///
/// Sits on top of a [`super::MergeIterator`]: the merge needs tombstones to
/// shadow older versions, callers of ordinary reads must never see them.
pub struct LiveEntries<I> {
    inner: I,
}

impl<I> LiveEntries<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I> Iterator for LiveEntries<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.is_tombstone() => continue,
                item => return Some(item),
            }
        }
    }
}
