//! Error types for lsmkv
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using LsmError
pub type Result<T> = std::result::Result<T, LsmError>;

/// Unified error type for lsmkv operations
#[derive(Debug, Error)]
pub enum LsmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// On-disk state that does not match the table format, or a file pair
    /// that is inconsistent at startup
    #[error("Corruption in {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Background Worker Errors
    // -------------------------------------------------------------------------
    /// A flush or compaction failed on its worker thread
    #[error("Background task failed: {0}")]
    Background(String),

    /// The flush queue is full and the engine is configured to fail fast
    #[error("Write overloaded: flush queue is full")]
    WriteOverloaded,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LsmError {
    /// Build a corruption error for the given file
    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LsmError::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if the failed operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LsmError::Io(_) | LsmError::WriteOverloaded | LsmError::Background(_)
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, LsmError::Corruption { .. })
    }
}
