//! # Knot Store
//!
//! The cache store handle: named generations of request → response
//! entries, durable when backed by SQLite.
//!
//! ```text
//! CacheStorage            (one per origin)
//!     ├── "knot-app-cache-v1"   Cache
//!     │       └── GET url → CacheEntry
//!     └── "knot-app-cache-v0"   (stale, deleted on activation)
//! ```
//!
//! Only GET requests can be keyed; entries are overwritten whole on
//! re-put, never merged.

use thiserror::Error;

mod backend;
mod entry;
mod sqlite;
mod storage;

pub use backend::{CacheBackend, MemoryBackend};
pub use entry::{CacheEntry, CacheKey};
pub use sqlite::SqliteBackend;
pub use storage::{Cache, CacheStorage};

/// Errors raised by cache storage.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("Cache not found: {0}")]
    CacheNotFound(String),

    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
