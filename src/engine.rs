//! Engine Module
//!
//! The facade that coordinates the memtables, the table set and the two
//! background workers.
//!
//! ## Responsibilities
//! - Route writes to the active memtable and rotate it at the threshold
//! - Serve point and range reads from a consistent snapshot
//! - Apply back-pressure when the flush queue is full
//! - Drive flush, compaction and shutdown

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{bounded, Sender};
use parking_lot::Mutex;

use crate::config::{Backpressure, Config};
use crate::entry::Entry;
use crate::error::{LsmError, Result};
use crate::iterator::{self, LiveEntries, MergeIterator};
use crate::memtable::MemTable;
use crate::state::Shared;
use crate::storage::compaction::{CompactionTask, Compactor};
use crate::storage::flush::{FlushTask, FlushWorker};
use crate::storage::StorageManager;

/// Lazy ascending iterator returned by [`Engine::range`]
pub type Range = LiveEntries<MergeIterator>;

/// Depth of the compaction request queue
const COMPACTION_QUEUE_CAPACITY: usize = 4;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (upsert): take the state lock shared, insert into the active
///   memtable (which has its own lock), release. Writes to the same key are
///   atomic; the last insert wins.
/// - **Rotation**: serialized by `rotate_lock`; the state lock is taken
///   exclusively only for the pointer swap.
/// - **Reads** (get/range): clone the structural pointers under a shared
///   lock and read without holding it.
/// - **Background**: one flush worker and one compaction worker, so at most
///   one of each is in flight.
pub struct Engine {
    shared: Arc<Shared>,

    /// Bounded; a full queue is back-pressure on writers
    flush_tx: Sender<FlushTask>,

    compaction_tx: Sender<CompactionTask>,

    /// Worker threads, joined by `close()`
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Serializes memtable rotation
    rotate_lock: Mutex<()>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Recover crash artifacts and load existing SSTables
    /// 3. Start the flush and compaction workers
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (storage, recovered) = StorageManager::open(&config.data_dir)?;
        let table_count = recovered.tables.len();
        let shared = Arc::new(Shared::new(config, storage, recovered.tables));

        let (flush_tx, flush_rx) = bounded(shared.config.flush_queue_capacity);
        let (compaction_tx, compaction_rx) = bounded(COMPACTION_QUEUE_CAPACITY);

        let flush_worker = FlushWorker::spawn(Arc::clone(&shared), flush_rx)?;
        let compactor = Compactor::spawn(Arc::clone(&shared), compaction_rx)?;

        tracing::info!(
            "Engine opened at {} ({} tables, flush threshold {} bytes)",
            shared.config.data_dir.display(),
            table_count,
            shared.config.flush_threshold
        );

        Ok(Self {
            shared,
            flush_tx,
            compaction_tx,
            workers: Mutex::new(vec![flush_worker, compactor]),
            rotate_lock: Mutex::new(()),
        })
    }

    /// Open with a path and flush threshold (convenience method)
    ///
    /// Uses default config otherwise
    pub fn open_path(path: impl AsRef<Path>, flush_threshold: usize) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path.as_ref())
            .flush_threshold(flush_threshold)
            .build();
        Self::open(config)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Memtables awaiting flush (newest to oldest)
    /// 3. SSTables (newest to oldest)
    ///
    /// The first version found decides; a tombstone reads as `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let snapshot = self.shared.snapshot()?;

        for memtable in snapshot.memtables() {
            if let Some(value) = memtable.get(key) {
                return Ok(value.as_bytes().cloned());
            }
        }

        for table in snapshot.tables.iter() {
            if let Some(entry) = table.get(key)? {
                return Ok(entry.value.as_bytes().cloned());
            }
        }

        Ok(None)
    }

    /// Iterate live entries with keys in `[from, to)` in ascending order
    ///
    /// `None` leaves that side unbounded. The iterator reads the memtables
    /// as of this call and the table set as of this call; later writes are
    /// not observed.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Range> {
        let snapshot = self.shared.snapshot()?;

        let mut sources = Vec::with_capacity(
            1 + snapshot.immutables.len() + snapshot.tables.len(),
        );
        for memtable in snapshot.memtables() {
            sources.push(iterator::from_entries(memtable.range(from, to)));
        }
        for table in snapshot.tables.iter() {
            sources.push(iterator::boxed(table.range(from, to)?)?);
        }

        Ok(LiveEntries::new(MergeIterator::new(sources)))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or overwrite an entry (a tombstone deletes the key)
    ///
    /// May hand the memtable to the flush worker. Blocks only when the
    /// flush backlog is full and the policy is `Backpressure::Block`; with
    /// `Backpressure::FailFast` the write is rejected before it is applied.
    /// The backlog counts every frozen memtable not yet published, so a
    /// flush that keeps failing holds writers back too.
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        let threshold = self.shared.config.flush_threshold;

        let size = {
            let state = self.shared.state.read();
            if self.shared.is_closed() {
                return Err(LsmError::Closed);
            }
            if self.shared.config.backpressure == Backpressure::FailFast
                && state.active.should_flush(threshold)
                && state.immutables.len() >= self.shared.max_pending_flushes()
            {
                return Err(LsmError::WriteOverloaded);
            }
            state.active.put(entry)
        };

        if size >= threshold {
            self.rotate(false)?;
        }
        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.upsert(Entry::put(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        ))
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.upsert(Entry::tombstone(Bytes::copy_from_slice(key)))
    }

    /// Swap out the active memtable and queue it for flushing
    ///
    /// Without `force`, does nothing unless the memtable is still over the
    /// threshold (another writer may have rotated first), and waits for or
    /// skips the rotation while the flush backlog is full.
    fn rotate(&self, force: bool) -> Result<()> {
        let config = &self.shared.config;
        let limit = self.shared.max_pending_flushes();

        loop {
            // Close flushes the active memtable itself
            if !force
                && config.backpressure == Backpressure::Block
                && !self.shared.wait_for_flush_slot()
            {
                return Ok(());
            }

            let _rotating = self.rotate_lock.lock();
            let frozen = {
                let mut state = self.shared.state.write();
                if state.active.is_empty() {
                    return Ok(());
                }
                if !force {
                    if self.shared.is_closed()
                        || !state.active.should_flush(config.flush_threshold)
                    {
                        return Ok(());
                    }
                    if state.immutables.len() >= limit {
                        match config.backpressure {
                            // Leave the table over the threshold; the next write is rejected
                            Backpressure::FailFast => return Ok(()),
                            // Lost the slot to another writer
                            Backpressure::Block => continue,
                        }
                    }
                }

                let frozen = std::mem::replace(&mut state.active, Arc::new(MemTable::new()));
                state.immutables.insert(0, Arc::clone(&frozen));
                frozen
            };

            tracing::debug!(
                "Rotated memtable ({} entries, {} bytes)",
                frozen.entry_count(),
                frozen.size()
            );

            return self
                .flush_tx
                .send(FlushTask::Flush(frozen))
                .map_err(|_| LsmError::Background("flush worker has stopped".to_string()));
        }
    }

    // =========================================================================
    // Background Work
    // =========================================================================

    /// Flush the active memtable and wait until it is durably published
    ///
    /// Also waits for every memtable queued before it, and reports a flush
    /// failure if any of them could not be written.
    pub fn flush(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(LsmError::Closed);
        }
        self.rotate(true)?;

        let (reply_tx, reply_rx) = bounded(1);
        self.flush_tx
            .send(FlushTask::Barrier(reply_tx))
            .map_err(|_| LsmError::Background("flush worker has stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| LsmError::Background("flush worker has stopped".to_string()))?
    }

    /// Schedule a compaction of all SSTables
    ///
    /// Returns immediately. A request made while another is still queued is
    /// merged into it; with at most one SSTable the compaction is a no-op.
    pub fn compact(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(LsmError::Closed);
        }
        if self
            .shared
            .compaction_requested
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Ok(());
        }
        self.compaction_tx
            .send(CompactionTask::Compact)
            .map_err(|_| LsmError::Background("compaction worker has stopped".to_string()))
    }

    /// Block until every compaction requested so far has finished
    ///
    /// Returns the failure of the most recent compaction, if it failed.
    pub fn wait_for_compaction(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(LsmError::Closed);
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.compaction_tx
            .send(CompactionTask::Barrier(reply_tx))
            .map_err(|_| LsmError::Background("compaction worker has stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| LsmError::Background("compaction worker has stopped".to_string()))?
    }

    /// Close the engine gracefully
    ///
    /// Flushes the memtable, drains both workers and releases every mapped
    /// table. Reports a flush that left data unwritten, or else a failure of
    /// the most recent compaction. Any later call fails with `LsmError::Closed`. Iterators created
    /// before closing stay valid.
    pub fn close(&self) -> Result<()> {
        if !self.shared.mark_closed() {
            return Err(LsmError::Closed);
        }
        tracing::info!("Closing engine at {}", self.shared.config.data_dir.display());

        let mut result = self.rotate(true);

        let _ = self.flush_tx.send(FlushTask::Shutdown);
        let _ = self.compaction_tx.send(CompactionTask::Shutdown);

        let timeout = self.shared.config.close_timeout;
        for handle in self.workers.lock().drain(..) {
            let joined = join_worker(handle, timeout);
            if result.is_ok() {
                result = joined;
            }
        }

        if result.is_ok() {
            let failure = self
                .shared
                .flush_failure()
                .or_else(|| self.shared.compaction_failure());
            if let Some(message) = failure {
                result = Err(LsmError::Background(message));
            }
        }

        self.shared.release();
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.shared.tables().len()
    }

    /// Get the active memtable size
    pub fn memtable_size(&self) -> usize {
        self.shared.state.read().active.size()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.shared.state.read().active.entry_count()
    }

    /// Number of frozen memtables not yet published as SSTables
    pub fn pending_flushes(&self) -> usize {
        self.shared.state.read().immutables.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.shared.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::error!("Failed to close engine on drop: {}", e);
        }
    }
}

/// Wait for a worker thread, giving up after `timeout`
fn join_worker(handle: JoinHandle<()>, timeout: Option<Duration>) -> Result<()> {
    let name = handle.thread().name().unwrap_or("worker").to_string();

    if let Some(timeout) = timeout {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("{} did not stop within {:?}", name, timeout);
                return Err(LsmError::Background(format!(
                    "{} did not stop within {:?}",
                    name, timeout
                )));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    handle
        .join()
        .map_err(|_| LsmError::Background(format!("{} panicked", name)))
}
