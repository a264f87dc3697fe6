//! Compactor
//!
//! Merges every SSTable into one, dropping tombstones and superseded
//! versions, on a single background worker.
//!
//! ## Crash safety
//! 1. Output is written as `{seq}.data.compacting` / `{seq}.index.compacting`
//! 2. Once synced it is renamed to `.compacted`; the data rename is the
//!    commit point
//! 3. The table set is swapped, the inputs are deleted, and the output is
//!    renamed to its live name
//!
//! Startup recovery discards `.compacting` files and finishes any
//! compaction that reached `.compacted` (see `StorageManager::open`).
//!
//! The memtables are not folded in: compaction covers every SSTable, so no
//! older data remains for a dropped tombstone to shadow.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use crate::error::{LsmError, Result};
use crate::iterator::{self, LiveEntries, MergeIterator};
use crate::state::Shared;

use super::sstable::{FileStage, SSTableBuilder, SSTableReader, TableFiles};

/// Work handed to the compaction worker
pub(crate) enum CompactionTask {
    Compact,

    /// Reply with the outcome of the last compaction once every earlier
    /// task has been handled
    Barrier(Sender<Result<()>>),

    Shutdown,
}

pub(crate) struct Compactor {
    shared: Arc<Shared>,
    rx: Receiver<CompactionTask>,
}

impl Compactor {
    pub fn spawn(shared: Arc<Shared>, rx: Receiver<CompactionTask>) -> io::Result<JoinHandle<()>> {
        let compactor = Self { shared, rx };
        thread::Builder::new()
            .name("lsmkv-compaction".to_string())
            .spawn(move || compactor.run())
    }

    fn run(self) {
        tracing::debug!("Compaction worker started");

        while let Ok(task) = self.rx.recv() {
            match task {
                CompactionTask::Compact => {
                    self.shared.compaction_requested.store(false, Ordering::SeqCst);
                    let result = compact(&self.shared);
                    if let Err(e) = &result {
                        tracing::error!("Compaction failed: {}", e);
                    }
                    self.shared.record_compaction_result(&result);
                }
                CompactionTask::Barrier(reply) => {
                    let status = match self.shared.compaction_failure() {
                        None => Ok(()),
                        Some(message) => Err(LsmError::Background(message)),
                    };
                    let _ = reply.send(status);
                }
                CompactionTask::Shutdown => break,
            }
        }

        tracing::debug!("Compaction worker stopped");
    }
}

/// Run one full compaction
pub(crate) fn compact(shared: &Shared) -> Result<()> {
    // Snapshot the inputs and reserve the output sequence together
    let (inputs, seq) = {
        let _publish = shared.storage.publish_lock();
        let tables = shared.tables();
        if tables.len() <= 1 {
            tracing::debug!("Skipping compaction: {} tables", tables.len());
            return Ok(());
        }
        (tables, shared.storage.allocate_seq())
    };

    let files = shared.storage.files(seq);
    tracing::info!("Compacting {} tables into SSTable {}", inputs.len(), seq);

    let written = (|| {
        let sources = inputs
            .iter()
            .map(|table| iterator::boxed(table.iter()))
            .collect::<Result<Vec<_>>>()?;
        let merged = LiveEntries::new(MergeIterator::new(sources));

        let mut builder = SSTableBuilder::new(files.clone(), FileStage::Compacting)?;
        for entry in merged {
            builder.add(&entry?)?;
        }
        builder.finish()
    })();

    let metadata = match written {
        Ok(metadata) => metadata,
        Err(e) => {
            files.discard(FileStage::Compacting);
            return Err(e);
        }
    };

    let output = commit_output(&files)?;
    shared.install_compacted(&inputs, output);

    let mut inputs_removed = true;
    for table in inputs.iter() {
        if let Err(e) = table.files().remove() {
            tracing::warn!("Failed to delete compacted SSTable {}: {}", table.seq(), e);
            inputs_removed = false;
        }
    }

    // A leftover input must not outlive the marker, or it would resurface
    // keys the output dropped; recovery finishes the job instead.
    if inputs_removed {
        files.promote(FileStage::Compacted, FileStage::Live)?;
    }

    tracing::info!(
        "Compaction finished: {} tables -> SSTable {} ({} entries)",
        inputs.len(),
        seq,
        metadata.entry_count
    );
    Ok(())
}

/// Move finished output past its commit point and open it
///
/// Until the output is installed the inputs are still live, so a failure
/// here removes the marker again; otherwise a later open would promote it
/// over tables flushed after it.
fn commit_output(files: &TableFiles) -> Result<Arc<SSTableReader>> {
    if let Err(e) = files.promote(FileStage::Compacting, FileStage::Compacted) {
        files.discard(FileStage::Compacted);
        files.discard(FileStage::Compacting);
        return Err(e);
    }

    match SSTableReader::open(files, FileStage::Compacted) {
        Ok(reader) => Ok(Arc::new(reader)),
        Err(e) => {
            files.discard(FileStage::Compacted);
            Err(e)
        }
    }
}
