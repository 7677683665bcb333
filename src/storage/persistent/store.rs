//! WAL-backed league store.
//!
//! Reads are served from in-memory tables. Writes are validated against
//! those tables, appended to the WAL, then applied, all under one write
//! lock so the log order matches the applied order.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::Game;
use crate::storage::tables::LeagueTables;
use crate::storage::traits::{BatchOutcome, LeagueStore, StorageError, WriteBatch};

use super::file_lock::FileLock;
use super::snapshot::{read_snapshot, write_snapshot};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "teamlink.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn wal_err(e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::InvalidInput {
        return StorageError::SerializationError(format!("write too large to log: {e}"));
    }
    StorageError::BackendError(format!("WAL write failed: {e}"))
}

struct State {
    tables: LeagueTables,
    /// Snapshot on disk that the WAL must build on.
    snapshot_id: Option<Uuid>,
    /// Whether the WAL starts with a checkpoint naming `snapshot_id`.
    /// Appends are refused until it does.
    wal_current: bool,
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Identifier of the snapshot written, if compaction ran.
    pub snapshot_id: Option<Uuid>,
    /// WAL entries folded into the snapshot.
    pub entries_compacted: u64,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// Durable [`LeagueStore`] living in a data directory.
pub struct PersistentLeagueStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    state: RwLock<State>,
    config: PersistentConfig,
}

impl PersistentLeagueStore {
    /// Open or create a store in `dir`.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::ConnectionError(format!("failed to create data directory: {e}"))
        })?;

        let lock = FileLock::acquire(dir)
            .map_err(|e| StorageError::ConnectionError(format!("failed to acquire lock: {e}")))?;

        let (snapshot_id, tables) = match read_snapshot(dir)
            .map_err(|e| StorageError::SerializationError(format!("failed to read snapshot: {e}")))?
        {
            Some((header, tables)) => {
                info!(
                    snapshot = %header.id,
                    games = header.games,
                    mappings = header.mappings,
                    "loaded snapshot"
                );
                (Some(header.id), tables)
            }
            None => (None, LeagueTables::new()),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write).map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                StorageError::SerializationError(format!("corrupted WAL: {e}"))
            } else {
                StorageError::ConnectionError(format!("failed to open WAL: {e}"))
            }
        })?;

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            state: RwLock::new(State {
                tables,
                snapshot_id,
                wal_current: false,
            }),
            config,
        };
        store.recover()?;
        Ok(store)
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replay the WAL on top of the loaded snapshot.
    ///
    /// Every WAL starts with a checkpoint naming the snapshot it builds on.
    /// A WAL whose checkpoint names a different snapshot was
    /// already folded into the current one by an interrupted compaction;
    /// it is discarded instead of replayed.
    fn recover(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("league.recover"))?;

        let mut entries = Vec::new();
        for entry in self
            .wal
            .iter()
            .map_err(|e| StorageError::SerializationError(format!("failed to iterate WAL: {e}")))?
        {
            let entry = entry
                .map_err(|e| StorageError::SerializationError(format!("corrupted WAL entry: {e}")))?;
            entries.push(entry);
        }

        let base = match entries.first().map(|e| &e.kind) {
            Some(WalEntryKind::Checkpoint { snapshot_id }) => *snapshot_id,
            _ => None,
        };

        if entries.is_empty() || base != state.snapshot_id {
            if !entries.is_empty() {
                warn!(
                    wal_base = ?base,
                    snapshot = ?state.snapshot_id,
                    stale_entries = entries.len(),
                    "WAL predates the current snapshot; discarding"
                );
            }
            return self.reset_wal(&mut state);
        }
        state.wal_current = true;

        let mut replayed = 0usize;
        for entry in entries {
            match entry.kind {
                WalEntryKind::Batch(batch) => {
                    state.tables.apply(&batch).map_err(|e| {
                        StorageError::SerializationError(format!(
                            "WAL entry {} does not replay cleanly: {e}",
                            entry.sequence
                        ))
                    })?;
                }
                WalEntryKind::DeleteMappings { namespace } => {
                    state.tables.delete_mappings(&namespace);
                }
                WalEntryKind::DeleteGames { namespace } => {
                    state.tables.delete_games(&namespace);
                }
                WalEntryKind::Checkpoint { .. } => continue,
            }
            replayed += 1;
        }

        if replayed > 0 {
            info!(entries = replayed, "replayed WAL");
        }
        Ok(())
    }

    /// Empty the WAL and start it with a checkpoint naming the current snapshot.
    fn reset_wal(&self, state: &mut State) -> Result<(), StorageError> {
        state.wal_current = false;
        self.wal.truncate().map_err(wal_err)?;
        self.wal
            .append(WalEntryKind::Checkpoint {
                snapshot_id: state.snapshot_id,
            })
            .map_err(wal_err)?;
        state.wal_current = true;
        Ok(())
    }

    /// Finish a WAL reset left incomplete by a failed compaction. Entries
    /// appended behind a stale checkpoint would be discarded on reopen.
    fn ensure_wal_current(&self, state: &mut State) -> Result<(), StorageError> {
        if state.wal_current {
            return Ok(());
        }
        warn!(snapshot = ?state.snapshot_id, "WAL reset pending; retrying before write");
        self.reset_wal(state)
    }

    /// Fold the WAL into a fresh snapshot and truncate it.
    ///
    /// Safe to interrupt at any point: until the snapshot rename lands the
    /// old snapshot plus WAL remain authoritative, and afterwards the stale
    /// WAL is recognised by its checkpoint and discarded on reopen. If the
    /// WAL reset fails, writes are refused until a retry succeeds.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("league.compact"))?;

        let wal_size_before = self.wal.size_bytes().unwrap_or(0);
        // The leading checkpoint is not data.
        let pending = self.wal.current_sequence().map_err(wal_err)?.saturating_sub(1);
        if pending == 0 {
            return Ok(CompactionResult {
                snapshot_id: state.snapshot_id,
                entries_compacted: 0,
                wal_size_before,
                wal_size_after: wal_size_before,
            });
        }

        let header = write_snapshot(&self.dir, &state.tables)
            .map_err(|e| StorageError::BackendError(format!("failed to write snapshot: {e}")))?;
        state.snapshot_id = Some(header.id);
        self.reset_wal(&mut state)?;

        let wal_size_after = self.wal.size_bytes().unwrap_or(0);
        info!(
            snapshot = %header.id,
            entries = pending,
            wal_size_before,
            wal_size_after,
            "compacted WAL"
        );
        Ok(CompactionResult {
            snapshot_id: Some(header.id),
            entries_compacted: pending,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    fn maybe_compact(&self) {
        if self.wal_size() < self.config.max_wal_size {
            return;
        }
        debug!(wal_size = self.wal_size(), "WAL over threshold, compacting");
        if let Err(e) = self.compact() {
            // Data is still durable in the WAL; retry on the next write.
            warn!(error = %e, "compaction failed");
        }
    }

    fn log_and_apply<T>(
        &self,
        context: &'static str,
        kind: WalEntryKind,
        apply: impl FnOnce(&mut LeagueTables) -> T,
    ) -> Result<T, StorageError> {
        let out = {
            let mut state = self.state.write().map_err(|_| lock_err(context))?;
            self.ensure_wal_current(&mut state)?;
            self.wal.append(kind).map_err(wal_err)?;
            apply(&mut state.tables)
        };
        self.maybe_compact();
        Ok(out)
    }
}

impl LeagueStore for PersistentLeagueStore {
    fn game_exists(&self, namespace: &str, game: &Game) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("league.game_exists"))?;
        Ok(state.tables.game_exists(namespace, game))
    }

    fn opponents(&self, namespace: &str, date: i32, team: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("league.opponents"))?;
        Ok(state.tables.opponents(namespace, date, team))
    }

    fn games(&self, namespace: &str) -> Result<Vec<Game>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("league.games"))?;
        Ok(state.tables.games(namespace))
    }

    fn mapping(&self, namespace: &str, secondary: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("league.mapping"))?;
        Ok(state.tables.mapping(namespace, secondary))
    }

    fn mappings(&self, namespace: &str) -> Result<HashMap<String, String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("league.mappings"))?;
        Ok(state.tables.mappings(namespace))
    }

    fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome, StorageError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let outcome = {
            let mut state = self.state.write().map_err(|_| lock_err("league.apply"))?;
            state.tables.check(&batch)?;
            self.ensure_wal_current(&mut state)?;
            self.wal.append(WalEntryKind::Batch(batch.clone())).map_err(wal_err)?;
            state.tables.apply_checked(&batch)
        };
        self.maybe_compact();
        Ok(outcome)
    }

    fn delete_mappings(&self, namespace: &str) -> Result<usize, StorageError> {
        self.log_and_apply(
            "league.delete_mappings",
            WalEntryKind::DeleteMappings {
                namespace: namespace.to_string(),
            },
            |tables| tables.delete_mappings(namespace),
        )
    }

    fn delete_games(&self, namespace: &str) -> Result<usize, StorageError> {
        self.log_and_apply(
            "league.delete_games",
            WalEntryKind::DeleteGames {
                namespace: namespace.to_string(),
            },
            |tables| tables.delete_games(namespace),
        )
    }
}
