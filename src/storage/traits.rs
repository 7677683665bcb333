//! Abstract storage traits for teamlink.
//!
//! [`LeagueStore`] is the contract a relational backend must implement:
//! point queries over `primary_games` and `mapping`, plus atomic
//! multi-statement write batches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::Game;
use crate::mapping::MappingEntry;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// A single statement inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert a primary-season game. Fails the batch if the game already
    /// exists under either orientation.
    InsertGame(Game),

    /// Insert a mapping unless one already exists for its secondary name.
    InsertMappingIfAbsent(MappingEntry),

    /// Insert or overwrite the mapping for its secondary name.
    UpsertMapping(MappingEntry),
}

/// A namespace-scoped set of writes applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Namespace every statement applies to.
    pub namespace: String,
    /// Statements in application order.
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ops: Vec::new(),
        }
    }

    /// Appends a statement.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Returns true if the batch has no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Row counts produced by applying a [`WriteBatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Games inserted.
    pub games_inserted: usize,
    /// Mappings newly inserted.
    pub mappings_inserted: usize,
    /// Existing mappings whose primary changed.
    pub mappings_updated: usize,
}

/// Storage trait for primary games and team mappings.
///
/// # Safety Considerations
/// - `apply` must be atomic: either every statement takes effect or none does
/// - Implementations should handle concurrent access safely
pub trait LeagueStore: Send + Sync {
    /// Returns true if `game` exists in `namespace` under either orientation.
    fn game_exists(&self, namespace: &str, game: &Game) -> Result<bool, StorageError>;

    /// Distinct opponents of `team` on `date`, in ascending order.
    fn opponents(&self, namespace: &str, date: i32, team: &str) -> Result<Vec<String>, StorageError>;

    /// All games in `namespace`, ordered by date then team names.
    fn games(&self, namespace: &str) -> Result<Vec<Game>, StorageError>;

    /// The primary identity mapped to `secondary`, if any.
    fn mapping(&self, namespace: &str, secondary: &str) -> Result<Option<String>, StorageError>;

    /// The full mapping table for `namespace`.
    fn mappings(&self, namespace: &str) -> Result<HashMap<String, String>, StorageError>;

    /// Apply a batch atomically.
    fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome, StorageError>;

    /// Delete every mapping in `namespace`. Returns the number removed.
    fn delete_mappings(&self, namespace: &str) -> Result<usize, StorageError>;

    /// Delete every game in `namespace`. Returns the number removed.
    fn delete_games(&self, namespace: &str) -> Result<usize, StorageError>;
}
