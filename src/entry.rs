//! Entry model
//!
//! A key paired with either a live value or a tombstone, plus the record
//! codec shared by the SSTable writer and reader.
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬─────────┬────────────────┬─────────────────────┐
//! │ KeyLen (u64) │   Key   │ ValueLen (i64) │ Value               │
//! └──────────────┴─────────┴────────────────┴─────────────────────┘
//!   ValueLen = -1 marks a tombstone; no value bytes follow
//! ```
//! All integers are little-endian.

use bytes::Bytes;

/// Size of the key length prefix
pub(crate) const KEY_LEN_SIZE: usize = 8;

/// Size of the value length prefix
pub(crate) const VALUE_LEN_SIZE: usize = 8;

/// Value length written in place of a tombstone's value
pub(crate) const TOMBSTONE_MARKER: i64 = -1;

/// Value half of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A live value
    Put(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}

impl Value {
    /// Bytes of a live value, `None` for a tombstone
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Put(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    /// Length of the value bytes (0 for a tombstone)
    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A key and its most recent value or tombstone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Bytes,
    pub value: Value,
}

impl Entry {
    /// Create a live entry
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Value::Put(value.into()),
        }
    }

    /// Create a tombstone entry
    pub fn tombstone(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Value::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }

    /// Number of bytes this entry occupies in an SSTable data file
    pub fn encoded_len(&self) -> usize {
        KEY_LEN_SIZE + self.key.len() + VALUE_LEN_SIZE + self.value.len()
    }

    /// Append the on-disk record to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        match &self.value {
            Value::Put(v) => {
                buf.extend_from_slice(&(v.len() as i64).to_le_bytes());
                buf.extend_from_slice(v);
            }
            Value::Tombstone => buf.extend_from_slice(&TOMBSTONE_MARKER.to_le_bytes()),
        }
    }
}
