//! # lsmkv
//!
//! An embeddable log-structured merge key-value store with:
//! - Arbitrary byte-string keys and values, ordered by unsigned byte comparison
//! - Non-blocking writes into an in-memory sorted table
//! - Background flush to immutable, memory-mapped sorted tables
//! - Background full compaction that drops tombstones
//! - Crash-safe publication via atomic rename, with recovery on open
//!
//! ## Architecture Overview
//!
//! ```text
//!            put / delete                    get / range
//!                 │                               │
//! ┌───────────────▼───────────────────────────────▼─────────────┐
//! │                          Engine                              │
//! │        (state RwLock: active, immutables, table set)         │
//! └───────┬───────────────────────┬──────────────────────┬──────┘
//!         │                       │                      │
//!         ▼                       ▼                      ▼
//!  ┌─────────────┐   rotate ┌─────────────┐      ┌─────────────┐
//!  │   Active    │ ───────▶ │ Immutables  │      │  SSTables   │
//!  │  MemTable   │          │ (awaiting)  │      │  (mmapped)  │
//!  └─────────────┘          └──────┬──────┘      └──────▲──────┘
//!                                  │ bounded queue      │
//!                                  ▼                    │
//!                           ┌─────────────┐      ┌──────┴──────┐
//!                           │Flush worker │ ───▶ │  Compactor  │
//!                           └─────────────┘      └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod entry;
pub mod memtable;
pub mod iterator;
pub mod storage;
pub mod engine;

pub(crate) mod state;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LsmError, Result};
pub use config::{Backpressure, Config};
pub use entry::{Entry, Value};
pub use engine::{Engine, Range};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of lsmkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
