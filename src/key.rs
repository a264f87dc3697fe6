//! Byte-key comparator
//!
//! Every ordering decision in the engine (memtable order, SSTable
//! construction, binary search, merge heap) goes through [`compare`].
//! Keys are compared as unsigned bytes; a strict prefix sorts first.

use std::cmp::Ordering;

/// Total order over byte strings
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].iter().zip(&b[..common]).position(|(x, y)| x != y) {
        Some(i) => a[i].cmp(&b[i]),
        None => a.len().cmp(&b.len()),
    }
}

/// True when `key` lies in `[from, to)`; `None` leaves that side open
pub fn in_range(key: &[u8], from: Option<&[u8]>, to: Option<&[u8]>) -> bool {
    let above = from.map_or(true, |f| compare(key, f) != Ordering::Less);
    let below = to.map_or(true, |t| compare(key, t) == Ordering::Less);
    above && below
}
