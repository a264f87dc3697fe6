//! Shared engine state
//!
//! The structural pointers (active memtable, memtables awaiting flush, table
//! set) live behind a single RwLock. Readers hold it only long enough to
//! clone the pointers into a [`Snapshot`]; the flush worker and compactor
//! hold it exclusively only to swap pointers, never across I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::Config;
use crate::error::{LsmError, Result};
use crate::memtable::MemTable;
use crate::storage::{SSTableReader, StorageManager};

/// Ordered table set, newest first
pub type TableSet = Arc<Vec<Arc<SSTableReader>>>;

pub(crate) struct State {
    /// Memtable receiving writes
    pub active: Arc<MemTable>,

    /// Frozen memtables waiting for the flush worker, newest first
    pub immutables: Vec<Arc<MemTable>>,

    pub tables: TableSet,
}

/// Point-in-time view of every data source
pub struct Snapshot {
    pub active: Arc<MemTable>,
    pub immutables: Vec<Arc<MemTable>>,
    pub tables: TableSet,
}

impl Snapshot {
    /// Memtables from most to least recent
    pub fn memtables(&self) -> impl Iterator<Item = &Arc<MemTable>> {
        std::iter::once(&self.active).chain(self.immutables.iter())
    }
}

/// State shared between the engine facade and its background workers
pub(crate) struct Shared {
    pub config: Config,
    pub storage: StorageManager,
    pub state: RwLock<State>,

    /// Set once by `close()`; checked by every entry point
    closed: AtomicBool,

    /// Set while a compaction request is queued but not yet started
    pub compaction_requested: AtomicBool,

    /// Last flush failure that left data unflushed
    flush_failure: Mutex<Option<String>>,

    /// Outcome of the most recent compaction
    compaction_failure: Mutex<Option<String>>,

    /// Signalled whenever a frozen memtable is retired, and on close
    flush_progress: Mutex<()>,
    flush_progressed: Condvar,
}

impl Shared {
    pub fn new(config: Config, storage: StorageManager, tables: Vec<Arc<SSTableReader>>) -> Self {
        Self {
            config,
            storage,
            state: RwLock::new(State {
                active: Arc::new(MemTable::new()),
                immutables: Vec::new(),
                tables: Arc::new(tables),
            }),
            closed: AtomicBool::new(false),
            compaction_requested: AtomicBool::new(false),
            flush_failure: Mutex::new(None),
            compaction_failure: Mutex::new(None),
            flush_progress: Mutex::new(()),
            flush_progressed: Condvar::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the engine closed; returns false if it already was
    ///
    /// Taken under the state write lock so no writer is mid-insert.
    pub fn mark_closed(&self) -> bool {
        let first = {
            let _state = self.state.write();
            !self.closed.swap(true, Ordering::SeqCst)
        };
        self.notify_flush_progress();
        first
    }

    /// Most frozen memtables a write may leave awaiting flush: a full
    /// queue plus the one the worker holds
    pub fn max_pending_flushes(&self) -> usize {
        self.config.flush_queue_capacity + 1
    }

    /// Block until fewer than [`Self::max_pending_flushes`] memtables await
    /// flush, or the engine is closed
    ///
    /// Returns false if woken by close.
    pub fn wait_for_flush_slot(&self) -> bool {
        let limit = self.max_pending_flushes();
        let mut progress = self.flush_progress.lock();
        loop {
            if self.is_closed() {
                return false;
            }
            if self.state.read().immutables.len() < limit {
                return true;
            }
            self.flush_progressed.wait(&mut progress);
        }
    }

    fn notify_flush_progress(&self) {
        let _progress = self.flush_progress.lock();
        self.flush_progressed.notify_all();
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.state.read();
        if self.is_closed() {
            return Err(LsmError::Closed);
        }
        Ok(Snapshot {
            active: Arc::clone(&state.active),
            immutables: state.immutables.clone(),
            tables: Arc::clone(&state.tables),
        })
    }

    pub fn tables(&self) -> TableSet {
        Arc::clone(&self.state.read().tables)
    }

    /// Publish a flushed table and stop serving its memtable
    pub fn install_flushed(&self, memtable: &Arc<MemTable>, table: Arc<SSTableReader>) {
        {
            let mut state = self.state.write();

            let mut tables = Vec::with_capacity(state.tables.len() + 1);
            tables.push(table);
            tables.extend(state.tables.iter().cloned());
            state.tables = Arc::new(tables);

            state.immutables.retain(|m| !Arc::ptr_eq(m, memtable));
        }
        self.notify_flush_progress();
    }

    /// Drop a frozen memtable that needed no table
    pub fn retire_memtable(&self, memtable: &Arc<MemTable>) {
        self.state
            .write()
            .immutables
            .retain(|m| !Arc::ptr_eq(m, memtable));
        self.notify_flush_progress();
    }

    /// Replace the compaction inputs with their merged output
    ///
    /// Tables flushed while the compaction ran are newer than the output and
    /// stay in front of it.
    pub fn install_compacted(&self, inputs: &[Arc<SSTableReader>], output: Arc<SSTableReader>) {
        let mut state = self.state.write();

        let mut tables: Vec<_> = state
            .tables
            .iter()
            .filter(|t| !inputs.iter().any(|i| i.seq() == t.seq()))
            .cloned()
            .collect();
        tables.push(output);
        tables.sort_by(|a, b| b.seq().cmp(&a.seq()));
        state.tables = Arc::new(tables);
    }

    /// Release every memtable and table held by the engine
    pub fn release(&self) {
        let mut state = self.state.write();
        state.active = Arc::new(MemTable::new());
        state.immutables.clear();
        state.tables = Arc::new(Vec::new());
    }

    pub fn record_flush_failure(&self, message: String) {
        *self.flush_failure.lock() = Some(message);
    }

    pub fn clear_flush_failure(&self) {
        self.flush_failure.lock().take();
    }

    pub fn flush_failure(&self) -> Option<String> {
        self.flush_failure.lock().clone()
    }

    pub fn record_compaction_result(&self, result: &Result<()>) {
        *self.compaction_failure.lock() = result.as_ref().err().map(|e| e.to_string());
    }

    pub fn compaction_failure(&self) -> Option<String> {
        self.compaction_failure.lock().clone()
    }
}
