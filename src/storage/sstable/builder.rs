//! SSTable Builder
//!
//! Writes sorted entries to a new data/index file pair.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::entry::Entry;
use crate::error::{LsmError, Result};
use crate::key;

use super::{FileRole, FileStage, SSTable, TableFiles};

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    files: TableFiles,
    /// Stage the files are written under
    stage: FileStage,
    data: BufWriter<File>,
    index: BufWriter<File>,
    /// Number of entries written
    entry_count: u64,
    /// Current write position in the data file
    data_offset: u64,
    /// Preallocated data length, if known up front
    expected_len: Option<u64>,
    min_key: Option<Bytes>,
    last_key: Option<Bytes>,
    /// Reused record buffer
    scratch: Vec<u8>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder writing under the given stage
    ///
    /// Call `add()` in strictly ascending key order, then `finish()`.
    pub fn new(files: TableFiles, stage: FileStage) -> Result<Self> {
        let data = create(&files.path(FileRole::Data, stage))?;
        let index = create(&files.path(FileRole::Index, stage))?;

        Ok(Self {
            files,
            stage,
            data: BufWriter::new(data),
            index: BufWriter::new(index),
            entry_count: 0,
            data_offset: 0,
            expected_len: None,
            min_key: None,
            last_key: None,
            scratch: Vec::new(),
        })
    }

    /// Create a builder whose files are sized up front to fit exactly
    pub fn with_capacity(
        files: TableFiles,
        stage: FileStage,
        data_len: u64,
        entry_count: u64,
    ) -> Result<Self> {
        let mut builder = Self::new(files, stage)?;
        builder.data.get_ref().set_len(data_len)?;
        builder
            .index
            .get_ref()
            .set_len(entry_count * super::OFFSET_SIZE as u64)?;
        builder.expected_len = Some(data_len);
        Ok(builder)
    }

    /// Append an entry; keys must be strictly increasing
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key::compare(last, &entry.key) != Ordering::Less {
                return Err(LsmError::Storage(format!(
                    "SSTable keys out of order: {:?} after {:?}",
                    entry.key, last
                )));
            }
        }

        self.index.write_all(&self.data_offset.to_le_bytes())?;

        self.scratch.clear();
        entry.encode_into(&mut self.scratch);
        self.data.write_all(&self.scratch)?;

        self.data_offset += self.scratch.len() as u64;
        self.entry_count += 1;

        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.last_key = Some(entry.key.clone());

        Ok(())
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Flush and fsync both files, leaving them under the builder's stage
    pub fn finish(self) -> Result<SSTable> {
        if let Some(expected) = self.expected_len {
            if expected != self.data_offset {
                return Err(LsmError::Storage(format!(
                    "SSTable size mismatch: preallocated {} bytes, wrote {}",
                    expected, self.data_offset
                )));
            }
        }

        for writer in [self.data, self.index] {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        Ok(SSTable {
            files: self.files,
            stage: self.stage,
            entry_count: self.entry_count,
            min_key: self.min_key,
            max_key: self.last_key,
            data_len: self.data_offset,
        })
    }
}

fn create(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?)
}

/// Write sorted, deduplicated entries as a published table
///
/// The pair is written under `.tmp` names, synced, then renamed into place.
/// On failure the temp files are removed and nothing is published.
pub fn write_table(files: TableFiles, entries: &[Entry]) -> Result<SSTable> {
    let data_len: u64 = entries.iter().map(|e| e.encoded_len() as u64).sum();

    let written = (|| {
        let mut builder = SSTableBuilder::with_capacity(
            files.clone(),
            FileStage::Temp,
            data_len,
            entries.len() as u64,
        )?;
        for entry in entries {
            builder.add(entry)?;
        }
        builder.finish()
    })();

    let mut table = match written {
        Ok(table) => table,
        Err(e) => {
            files.discard(FileStage::Temp);
            return Err(e);
        }
    };

    if let Err(e) = files.promote(FileStage::Temp, FileStage::Live) {
        files.discard(FileStage::Temp);
        return Err(e);
    }
    table.stage = FileStage::Live;
    Ok(table)
}
