//! Persistent storage backend for teamlink.
//!
//! This module provides durable, crash-safe storage with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking for single-process access to a data directory
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction to bound WAL growth
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   PersistentLeagueStore                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐                    │
//! │  │ WriteAheadLog   │  │ Snapshot        │                    │
//! │  │ (append-only)   │  │ (compacted)     │                    │
//! │  └────────┬────────┘  └────────┬────────┘                    │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │   FileLock (flock)  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use snapshot::SnapshotHeader;
pub use store::{CompactionResult, PersistentLeagueStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// WAL size (bytes) that triggers automatic compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the configuration for values that cannot work.
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StorageError::BackendError(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent teamlink database at the given path.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If the snapshot or WAL is corrupted beyond a torn tail
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use teamlink::storage::open_database;
/// use teamlink::LinkEngine;
///
/// let store = open_database("./league.teamlink", None)?;
/// let engine = LinkEngine::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentLeagueStore, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentLeagueStore::open(path.as_ref(), cfg)
}
