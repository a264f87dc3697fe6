//! Flush Pipeline
//!
//! A single background worker that turns frozen memtables into published
//! SSTables, in the order they were frozen.
//!
//! ## Protocol
//! 1. The engine swaps in a fresh memtable and lists the frozen one as
//!    awaiting flush (still readable)
//! 2. The frozen memtable is sent on a bounded channel; a full channel is
//!    back-pressure on the writer
//! 3. The worker writes the table, then installs it and retires the
//!    memtable in one state swap
//! 4. A memtable whose write fails stays readable and is retried every
//!    [`RETRY_INTERVAL`] until it succeeds; `flush()` and `close()` report
//!    the failure. It keeps counting against the writers' backlog, so a
//!    persistent failure stalls or rejects writes instead of piling up
//!    memtables

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{LsmError, Result};
use crate::memtable::MemTable;
use crate::state::Shared;

/// Pause between attempts to write a memtable that failed to flush
pub(crate) const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Work handed to the flush worker
pub(crate) enum FlushTask {
    /// Persist a frozen memtable
    Flush(Arc<MemTable>),

    /// Reply once every earlier task has been handled
    Barrier(Sender<Result<()>>),

    /// Drain and exit
    Shutdown,
}

pub(crate) struct FlushWorker {
    shared: Arc<Shared>,
    rx: Receiver<FlushTask>,
    /// Frozen memtables not yet persisted, oldest first
    pending: VecDeque<Arc<MemTable>>,
}

impl FlushWorker {
    pub fn spawn(shared: Arc<Shared>, rx: Receiver<FlushTask>) -> io::Result<JoinHandle<()>> {
        let worker = Self {
            shared,
            rx,
            pending: VecDeque::new(),
        };
        thread::Builder::new()
            .name("lsmkv-flush".to_string())
            .spawn(move || worker.run())
    }

    fn run(mut self) {
        tracing::debug!("Flush worker started");

        loop {
            let task = if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(task) => task,
                    Err(_) => break,
                }
            } else {
                match self.rx.recv_timeout(RETRY_INTERVAL) {
                    Ok(task) => task,
                    Err(RecvTimeoutError::Timeout) => {
                        self.drain();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            match task {
                FlushTask::Flush(memtable) => {
                    self.pending.push_back(memtable);
                    self.drain();
                }
                FlushTask::Barrier(reply) => {
                    self.drain();
                    let _ = reply.send(self.status());
                }
                FlushTask::Shutdown => break,
            }
        }

        // Flush whatever is still queued behind the shutdown request
        while let Ok(FlushTask::Flush(memtable)) = self.rx.try_recv() {
            self.pending.push_back(memtable);
        }
        self.drain();

        if !self.pending.is_empty() {
            tracing::error!(
                "Flush worker exiting with {} unflushed memtables",
                self.pending.len()
            );
        }
        tracing::debug!("Flush worker stopped");
    }

    /// Persist pending memtables in order, stopping at the first failure
    fn drain(&mut self) {
        while let Some(memtable) = self.pending.front() {
            match flush_memtable(&self.shared, memtable) {
                Ok(()) => {
                    self.pending.pop_front();
                    self.shared.clear_flush_failure();
                }
                Err(e) => {
                    if self.shared.flush_failure().is_none() {
                        tracing::error!("Flush failed, will retry: {}", e);
                    } else {
                        tracing::debug!("Flush retry failed: {}", e);
                    }
                    self.shared.record_flush_failure(e.to_string());
                    break;
                }
            }
        }
    }

    fn status(&self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let message = self
            .shared
            .flush_failure()
            .unwrap_or_else(|| "memtable not flushed".to_string());
        Err(LsmError::Background(message))
    }
}

/// Write one frozen memtable and publish it
fn flush_memtable(shared: &Shared, memtable: &Arc<MemTable>) -> Result<()> {
    if memtable.is_empty() {
        shared.retire_memtable(memtable);
        return Ok(());
    }

    let _publish = shared.storage.publish_lock();
    let seq = shared.storage.allocate_seq();
    let table = shared.storage.write_memtable(seq, memtable)?;
    let entries = table.entry_count();
    shared.install_flushed(memtable, table);

    tracing::info!("Flushed memtable to SSTable {} ({} entries)", seq, entries);
    Ok(())
}
