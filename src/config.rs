//! Configuration for lsmkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LsmError, Result};

/// Main configuration for an engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every SSTable file of this engine instance.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── 00000000000000000001.data
    ///     ├── 00000000000000000001.index
    ///     └── ...
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Size of the active memtable (in bytes) that triggers a flush
    pub flush_threshold: usize,

    // -------------------------------------------------------------------------
    // Flush Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Number of frozen memtables that may wait for the flush worker (1..=2)
    pub flush_queue_capacity: usize,

    /// What a writer does when the flush queue is full
    pub backpressure: Backpressure,

    /// Upper bound on how long `close()` waits for each background worker.
    /// `None` waits indefinitely.
    pub close_timeout: Option<Duration>,
}

/// Behaviour of `upsert` when the flush queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the writer until the flush worker frees a slot
    Block,

    /// Reject the write with `LsmError::WriteOverloaded`
    FailFast,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lsmkv_data"),
            flush_threshold: 4 * 1024 * 1024, // 4 MB
            flush_queue_capacity: 2,
            backpressure: Backpressure::Block,
            close_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configuration can drive an engine
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(LsmError::Config(
                "flush_threshold must be greater than zero".to_string(),
            ));
        }
        if !(1..=2).contains(&self.flush_queue_capacity) {
            return Err(LsmError::Config(format!(
                "flush_queue_capacity must be 1 or 2, got {}",
                self.flush_queue_capacity
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the memtable flush threshold (in bytes)
    pub fn flush_threshold(mut self, size: usize) -> Self {
        self.config.flush_threshold = size;
        self
    }

    /// Set the depth of the flush queue
    pub fn flush_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.flush_queue_capacity = capacity;
        self
    }

    /// Set the back-pressure policy
    pub fn backpressure(mut self, policy: Backpressure) -> Self {
        self.config.backpressure = policy;
        self
    }

    /// Set how long `close()` waits for each background worker
    pub fn close_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
