//! Compacted snapshots of the league tables.
//!
//! A snapshot is the full table state at a compaction point. It is written
//! to a temporary file and renamed into place, so a reader sees either the
//! previous snapshot or the new one, never a partial file.
//!
//! Rows are stored as a sequence of bounded chunks, each one codec record,
//! so no single record approaches [`codec::MAX_RECORD_SIZE`] however large
//! the tables grow.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [codec-framed SnapshotHeader]
//! [codec-framed SnapshotChunk 1]
//! [codec-framed SnapshotChunk 2]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::Game;
use crate::mapping::MappingEntry;
use crate::storage::tables::LeagueTables;
use crate::storage::traits::{WriteBatch, WriteOp};

use super::codec;

const SNAPSHOT_FILE: &str = "snapshot.dat";
const SNAPSHOT_TMP_FILE: &str = "snapshot.tmp";

/// Raw name bytes per chunk. JSON escaping at most sextuples a string,
/// which keeps a full chunk under [`codec::MAX_RECORD_SIZE`].
const CHUNK_BUDGET: usize = 8 * 1024 * 1024;

// Approximate JSON framing per row, beyond the name bytes.
const GAME_OVERHEAD: usize = 48;
const MAPPING_OVERHEAD: usize = 32;

/// Metadata stored ahead of the snapshot body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Identifies the snapshot; WAL checkpoints refer to it.
    pub id: Uuid,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Number of namespaces captured.
    pub namespaces: usize,
    /// Number of `primary_games` rows captured.
    pub games: usize,
    /// Number of `mapping` rows captured.
    pub mappings: usize,
}

/// A slice of one namespace's rows.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotChunk {
    namespace: String,
    games: Vec<Game>,
    mappings: Vec<MappingEntry>,
}

impl SnapshotChunk {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            games: Vec::new(),
            mappings: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.games.is_empty() && self.mappings.is_empty()
    }

    fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new(self.namespace);
        batch
            .ops
            .extend(self.games.into_iter().map(WriteOp::InsertGame));
        batch
            .ops
            .extend(self.mappings.into_iter().map(WriteOp::UpsertMapping));
        batch
    }
}

/// Location of the snapshot file inside a data directory.
#[must_use]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Durably write `tables` as the directory's current snapshot.
pub fn write_snapshot(dir: &Path, tables: &LeagueTables) -> IoResult<SnapshotHeader> {
    write_snapshot_chunked(dir, tables, CHUNK_BUDGET)
}

fn write_snapshot_chunked(dir: &Path, tables: &LeagueTables, budget: usize) -> IoResult<SnapshotHeader> {
    let (games, mappings) = tables.row_counts();
    let header = SnapshotHeader {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        namespaces: tables.namespace_count(),
        games,
        mappings,
    };

    let tmp = dir.join(SNAPSHOT_TMP_FILE);
    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(&header)?)?;
        write_chunks(&mut writer, tables, budget)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp, snapshot_path(dir))?;
    sync_dir(dir);
    Ok(header)
}

fn write_chunks(writer: &mut impl Write, tables: &LeagueTables, budget: usize) -> IoResult<()> {
    for (namespace, rows) in tables.namespaces_sorted() {
        let mut chunk = SnapshotChunk::new(namespace);
        let mut used = 0;

        for (date, pairs) in &rows.games_by_date {
            for (low, high) in pairs {
                used += low.len() + high.len() + GAME_OVERHEAD;
                chunk.games.push(Game::new(*date, low.clone(), high.clone()));
                if used >= budget {
                    flush_chunk(writer, &mut chunk)?;
                    used = 0;
                }
            }
        }
        for (secondary, primary) in &rows.mappings {
            used += secondary.len() + primary.len() + MAPPING_OVERHEAD;
            chunk
                .mappings
                .push(MappingEntry::new(secondary.clone(), primary.clone()));
            if used >= budget {
                flush_chunk(writer, &mut chunk)?;
                used = 0;
            }
        }
        flush_chunk(writer, &mut chunk)?;
    }
    Ok(())
}

fn flush_chunk(writer: &mut impl Write, chunk: &mut SnapshotChunk) -> IoResult<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    writer.write_all(&codec::encode(chunk)?)?;
    chunk.games.clear();
    chunk.mappings.clear();
    Ok(())
}

/// Read the directory's current snapshot, if one exists.
///
/// Fails with `InvalidData` if the restored rows disagree with the header.
pub fn read_snapshot(dir: &Path) -> IoResult<Option<(SnapshotHeader, LeagueTables)>> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(&path)?);
    codec::read_header(&mut reader)?;
    let header: SnapshotHeader = codec::decode(&mut reader)?;

    let mut tables = LeagueTables::new();
    while !reader.fill_buf()?.is_empty() {
        let chunk: SnapshotChunk = codec::decode(&mut reader)?;
        tables
            .apply(&chunk.into_batch())
            .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("snapshot chunk rejected: {e}")))?;
    }

    let restored = tables.row_counts();
    if restored != (header.games, header.mappings) || tables.namespace_count() != header.namespaces {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "snapshot {} holds {} games and {} mappings, header records {} and {}",
                header.id, restored.0, restored.1, header.games, header.mappings
            ),
        ));
    }
    Ok(Some((header, tables)))
}

// Persist the rename itself. Best effort: not every platform can fsync a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
