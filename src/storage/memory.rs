//! In-memory storage backend.
//!
//! Thread-safe implementation of [`LeagueStore`] intended for embedded
//! usage, tests, and as a reference implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::game::Game;
use crate::storage::tables::LeagueTables;
use crate::storage::traits::{BatchOutcome, LeagueStore, StorageError, WriteBatch};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory league store.
#[derive(Debug, Default)]
pub struct InMemoryLeagueStore {
    tables: RwLock<LeagueTables>,
}

impl InMemoryLeagueStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `(games, mappings)` rows across all namespaces.
    pub fn row_counts(&self) -> Result<(usize, usize), StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.row_counts"))?;
        Ok(tables.row_counts())
    }
}

impl LeagueStore for InMemoryLeagueStore {
    fn game_exists(&self, namespace: &str, game: &Game) -> Result<bool, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.game_exists"))?;
        Ok(tables.game_exists(namespace, game))
    }

    fn opponents(&self, namespace: &str, date: i32, team: &str) -> Result<Vec<String>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.opponents"))?;
        Ok(tables.opponents(namespace, date, team))
    }

    fn games(&self, namespace: &str) -> Result<Vec<Game>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.games"))?;
        Ok(tables.games(namespace))
    }

    fn mapping(&self, namespace: &str, secondary: &str) -> Result<Option<String>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.mapping"))?;
        Ok(tables.mapping(namespace, secondary))
    }

    fn mappings(&self, namespace: &str) -> Result<HashMap<String, String>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("league.mappings"))?;
        Ok(tables.mappings(namespace))
    }

    fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome, StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("league.apply"))?;
        tables.apply(&batch)
    }

    fn delete_mappings(&self, namespace: &str) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("league.delete_mappings"))?;
        Ok(tables.delete_mappings(namespace))
    }

    fn delete_games(&self, namespace: &str) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("league.delete_games"))?;
        Ok(tables.delete_games(namespace))
    }
}
