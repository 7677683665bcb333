//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Every mutation of the league tables is appended here, and fsynced when
//! configured, before it is applied in memory. A write batch is a single
//! record, so replay restores either all of a batch or none of it.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! The first record of a WAL that follows a compaction is a
//! [`WalEntryKind::Checkpoint`] naming the snapshot it builds on.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::storage::traits::WriteBatch;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number (restarts after truncation).
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// An atomic write batch.
    Batch(WriteBatch),
    /// All mappings of a namespace were deleted.
    DeleteMappings {
        /// Namespace that was cleared.
        namespace: String,
    },
    /// All games of a namespace were deleted.
    DeleteGames {
        /// Namespace that was cleared.
        namespace: String,
    },
    /// The entries that follow apply on top of this snapshot.
    Checkpoint {
        /// Snapshot the log builds on; `None` before the first compaction.
        snapshot_id: Option<Uuid>,
    },
}

struct WalState {
    /// Append handle. `None` after a failed rollback; reopened on next use.
    file: Option<File>,
    /// Length of the file up to the end of the last committed record.
    len: u64,
    sequence: u64,
    #[cfg(test)]
    short_write: Option<usize>,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal")
}

/// Write-Ahead Log for crash recovery.
///
/// Thread-safe via internal mutex. A failed append is rolled back to the
/// previous record boundary, so the file never holds a partial record
/// between two committed ones.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned for its last valid record. A torn tail
    /// left by a crash mid-append is cut off so later appends stay readable.
    /// Any other damage fails the open with `ErrorKind::InvalidData`.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let exists = path.exists() && std::fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let (sequence, len) = if exists {
            let (last_seq, valid_len) = Self::scan(path)?;
            let file_len = std::fs::metadata(path)?.len();
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    discarded_bytes = file_len - valid_len,
                    "WAL has a torn tail; truncating to last complete record"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            (last_seq, valid_len)
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (0, codec::HEADER_LEN)
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                file: Some(file),
                len,
                sequence,
                #[cfg(test)]
                short_write: None,
            }),
            sync_on_write,
        })
    }

    /// Append an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry. An entry too
    /// large to frame fails with `ErrorKind::InvalidInput` before the file
    /// is touched.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let candidate = state.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        if let Err(e) = self.write_record(&mut state, &encoded) {
            self.roll_back(&mut state);
            return Err(e);
        }

        state.len += encoded.len() as u64;
        state.sequence = candidate;
        Ok(candidate)
    }

    fn write_record(&self, state: &mut WalState, encoded: &[u8]) -> IoResult<()> {
        #[cfg(test)]
        if let Some(keep) = state.short_write.take() {
            let file = self.writable(state)?;
            file.write_all(&encoded[..keep.min(encoded.len())])?;
            return Err(IoError::new(ErrorKind::WriteZero, "short write"));
        }

        let file = self.writable(state)?;
        file.write_all(encoded)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Cuts the file back to the last committed record.
    fn roll_back(&self, state: &mut WalState) {
        let Some(file) = state.file.take() else {
            return;
        };
        let restored = file.set_len(state.len).and_then(|()| {
            if self.sync_on_write {
                file.sync_all()
            } else {
                Ok(())
            }
        });
        match restored {
            Ok(()) => state.file = Some(file),
            Err(e) => warn!(
                path = %self.path.display(),
                committed_len = state.len,
                error = %e,
                "failed to roll back WAL append; retrying before the next write"
            ),
        }
    }

    /// The append handle, reopened and cut to the committed length if a
    /// previous rollback could not finish.
    fn writable<'a>(&self, state: &'a mut WalState) -> IoResult<&'a mut File> {
        let file = match state.file.take() {
            Some(file) => file,
            None => {
                let file = OpenOptions::new().append(true).open(&self.path)?;
                file.set_len(state.len)?;
                if self.sync_on_write {
                    file.sync_all()?;
                }
                file
            }
        };
        Ok(state.file.insert(file))
    }

    /// Iterate over all entries in the WAL.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.state.lock().map_err(|_| poisoned())?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Discard every entry, leaving only the file header.
    ///
    /// Only call this once the entries are captured by a durable snapshot.
    /// On failure the log keeps its entries and stays appendable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let file = self.writable(&mut state)?;
        file.set_len(codec::HEADER_LEN)?;
        state.len = codec::HEADER_LEN;
        state.sequence = 0;
        if self.sync_on_write {
            if let Some(file) = state.file.as_ref() {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Returns `(last valid sequence, byte length of the valid prefix)`.
    ///
    /// Only a record cut short by the end of the file, or a tail of zero
    /// bytes left by a crash before the data reached disk, is treated as
    /// torn. A checksum or format failure anywhere is an error.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_seq = 0;
        let mut valid_len = iter.position()?;

        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last_seq = entry.sequence;
                    valid_len = iter.position()?;
                }
                Err(e) => {
                    if Self::tail_is_zeroed(path, valid_len)? {
                        warn!(sequence = last_seq + 1, error = %e, "WAL ends in zeroed bytes");
                        break;
                    }
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!(
                            "WAL record {} at offset {valid_len} is corrupt: {e}",
                            last_seq + 1
                        ),
                    ));
                }
            }
        }
        Ok((last_seq, valid_len))
    }

    fn tail_is_zeroed(path: &Path, from: u64) -> IoResult<bool> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(from))?;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                return Ok(true);
            }
            if buf[..n].iter().any(|b| *b != 0) {
                return Ok(false);
            }
        }
    }
}

/// Iterator over WAL entries.
///
/// A record cut short by the end of the file ends iteration; a record that
/// fails its checksum is yielded as an error.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::game::Game;
    use crate::storage::WriteOp;

    fn game_batch(date: i32) -> WalEntryKind {
        let mut batch = WriteBatch::new("ns");
        batch.push(WriteOp::InsertGame(Game::new(date, "A", "B")));
        WalEntryKind::Batch(batch)
    }

    fn dates(wal: &WriteAheadLog) -> Vec<i32> {
        wal.iter()
            .unwrap()
            .map(|e| match e.unwrap().kind {
                WalEntryKind::Batch(b) => match &b.ops[0] {
                    WriteOp::InsertGame(g) => g.date,
                    other => panic!("unexpected op {other:?}"),
                },
                other => panic!("unexpected entry {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(game_batch(1)).unwrap();
        wal.append(WalEntryKind::DeleteGames {
            namespace: "ns".to_string(),
        })
        .unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        let entries: Vec<_> = wal.iter().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::Batch(_)));
        assert!(matches!(entries[1].kind, WalEntryKind::DeleteGames { .. }));
    }

    #[test]
    fn test_torn_tail_is_cut_and_appends_remain_readable() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("torn.wal");
        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(game_batch(1)).unwrap();
            wal.append(game_batch(2)).unwrap();
        }

        let len = std::fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(len - 4).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        wal.append(game_batch(3)).unwrap();

        assert_eq!(dates(&wal), vec![1, 3]);
    }

    #[test]
    fn test_corrupt_record_fails_open_and_keeps_file() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("corrupt.wal");
        let second_record_at = {
            let wal = WriteAheadLog::open(&wal_path, false).unwrap();
            wal.append(game_batch(1)).unwrap();
            let at = wal.size_bytes().unwrap();
            wal.append(game_batch(2)).unwrap();
            wal.append(game_batch(3)).unwrap();
            at
        };

        let mut bytes = std::fs::read(&wal_path).unwrap();
        let len = bytes.len();
        bytes[usize::try_from(second_record_at).unwrap() + 10] ^= 0xFF;
        std::fs::write(&wal_path, &bytes).unwrap();

        let err = WriteAheadLog::open(&wal_path, false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len() as usize, len);
    }

    #[test]
    fn test_zeroed_tail_is_cut() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("zeroed.wal");
        let committed = {
            let wal = WriteAheadLog::open(&wal_path, false).unwrap();
            wal.append(game_batch(1)).unwrap();
            wal.size_bytes().unwrap()
        };
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[0u8; 512]).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(wal.size_bytes().unwrap(), committed);
        assert_eq!(dates(&wal), vec![1]);
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("short.wal");
        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        wal.append(game_batch(1)).unwrap();
        let committed = wal.size_bytes().unwrap();

        wal.state.lock().unwrap().short_write = Some(9);
        assert!(wal.append(game_batch(2)).is_err());
        assert_eq!(wal.size_bytes().unwrap(), committed);
        assert_eq!(wal.current_sequence().unwrap(), 1);

        assert_eq!(wal.append(game_batch(3)).unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(dates(&wal), vec![1, 3]);
    }

    #[test]
    fn test_lost_handle_reopens_at_committed_length() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("reopen.wal");
        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(game_batch(1)).unwrap();

        // Leftovers of an append whose rollback could not run.
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(b"\x01garbage").unwrap();
        drop(file);
        wal.state.lock().unwrap().file = None;

        wal.append(game_batch(2)).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(dates(&wal), vec![1, 2]);

        wal.state.lock().unwrap().file = None;
        wal.truncate().unwrap();
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        wal.append(game_batch(3)).unwrap();
        assert_eq!(dates(&wal), vec![3]);
    }

    #[test]
    fn test_truncate_resets_sequence() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("t.wal"), false).unwrap();
        wal.append(game_batch(1)).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 0);
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        assert_eq!(wal.iter().unwrap().count(), 0);
    }
}
