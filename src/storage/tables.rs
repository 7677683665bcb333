//! Table state shared by the storage backends.
//!
//! `LeagueTables` holds the contents of `primary_games` and `mapping` for
//! every namespace. The in-memory backend keeps it behind a lock; the
//! persistent backend additionally logs every change to the WAL and
//! snapshots it during compaction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::game::{Game, GameKey};
use crate::storage::traits::{BatchOutcome, StorageError, WriteBatch, WriteOp};

/// Rows of one namespace.
#[derive(Debug, Clone, Default)]
pub struct NamespaceTables {
    /// `primary_games` indexed by date: canonical `(low, high)` pairs.
    pub games_by_date: BTreeMap<i32, BTreeSet<(String, String)>>,
    /// `mapping` keyed by secondary name.
    pub mappings: BTreeMap<String, String>,
}

impl NamespaceTables {
    fn contains(&self, key: &GameKey) -> bool {
        self.games_by_date
            .get(&key.date)
            .is_some_and(|pairs| pairs.contains(&(key.low.clone(), key.high.clone())))
    }

    fn game_count(&self) -> usize {
        self.games_by_date.values().map(BTreeSet::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.games_by_date.is_empty() && self.mappings.is_empty()
    }
}

/// All tables of a store.
#[derive(Debug, Clone, Default)]
pub struct LeagueTables {
    namespaces: HashMap<String, NamespaceTables>,
}

impl LeagueTables {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of namespaces holding at least one row.
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Namespaces and their rows, ordered by namespace.
    #[must_use]
    pub fn namespaces_sorted(&self) -> Vec<(&str, &NamespaceTables)> {
        let mut all: Vec<_> = self
            .namespaces
            .iter()
            .map(|(name, rows)| (name.as_str(), rows))
            .collect();
        all.sort_unstable_by_key(|(name, _)| *name);
        all
    }

    /// Total `(games, mappings)` rows across all namespaces.
    #[must_use]
    pub fn row_counts(&self) -> (usize, usize) {
        self.namespaces.values().fold((0, 0), |(g, m), ns| {
            (g + ns.game_count(), m + ns.mappings.len())
        })
    }

    /// Whether the game exists under either orientation.
    #[must_use]
    pub fn game_exists(&self, namespace: &str, game: &Game) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|ns| ns.contains(&game.key()))
    }

    /// Distinct opponents of `team` on `date`, sorted.
    #[must_use]
    pub fn opponents(&self, namespace: &str, date: i32, team: &str) -> Vec<String> {
        let Some(pairs) = self
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.games_by_date.get(&date))
        else {
            return Vec::new();
        };

        let found: BTreeSet<&str> = pairs
            .iter()
            .filter_map(|(low, high)| {
                if low == team {
                    Some(high.as_str())
                } else if high == team {
                    Some(low.as_str())
                } else {
                    None
                }
            })
            .collect();
        found.into_iter().map(str::to_string).collect()
    }

    /// All games of a namespace, ordered by date.
    #[must_use]
    pub fn games(&self, namespace: &str) -> Vec<Game> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return Vec::new();
        };
        ns.games_by_date
            .iter()
            .flat_map(|(date, pairs)| {
                pairs
                    .iter()
                    .map(move |(low, high)| Game::new(*date, low.clone(), high.clone()))
            })
            .collect()
    }

    /// The primary identity mapped to `secondary`.
    #[must_use]
    pub fn mapping(&self, namespace: &str, secondary: &str) -> Option<String> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.mappings.get(secondary).cloned())
    }

    /// Every mapping of a namespace.
    #[must_use]
    pub fn mappings(&self, namespace: &str) -> HashMap<String, String> {
        self.namespaces
            .get(namespace)
            .map(|ns| {
                ns.mappings
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Checks that `batch` can be applied in full without mutating anything.
    pub fn check(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let existing = self.namespaces.get(&batch.namespace);
        let mut pending = HashSet::new();

        for op in &batch.ops {
            if let WriteOp::InsertGame(game) = op {
                let key = game.key();
                let duplicate = existing.is_some_and(|ns| ns.contains(&key)) || !pending.insert(key);
                if duplicate {
                    return Err(StorageError::DuplicateKey(format!(
                        "primary_games({}, {}, {}, {})",
                        batch.namespace, game.date, game.team_a, game.team_b
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies a batch that has passed [`LeagueTables::check`].
    pub fn apply_checked(&mut self, batch: &WriteBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        let ns = self.namespaces.entry(batch.namespace.clone()).or_default();
        for op in &batch.ops {
            match op {
                WriteOp::InsertGame(game) => {
                    let key = game.key();
                    if ns
                        .games_by_date
                        .entry(key.date)
                        .or_default()
                        .insert((key.low, key.high))
                    {
                        outcome.games_inserted += 1;
                    }
                }
                WriteOp::InsertMappingIfAbsent(entry) => {
                    if !ns.mappings.contains_key(&entry.secondary) {
                        ns.mappings
                            .insert(entry.secondary.clone(), entry.primary.clone());
                        outcome.mappings_inserted += 1;
                    }
                }
                WriteOp::UpsertMapping(entry) => {
                    match ns
                        .mappings
                        .insert(entry.secondary.clone(), entry.primary.clone())
                    {
                        None => outcome.mappings_inserted += 1,
                        Some(previous) if previous != entry.primary => outcome.mappings_updated += 1,
                        Some(_) => {}
                    }
                }
            }
        }

        if ns.is_empty() {
            self.namespaces.remove(&batch.namespace);
        }
        outcome
    }

    /// Checks then applies a batch.
    pub fn apply(&mut self, batch: &WriteBatch) -> Result<BatchOutcome, StorageError> {
        self.check(batch)?;
        Ok(self.apply_checked(batch))
    }

    /// Removes every mapping of a namespace, returning how many.
    pub fn delete_mappings(&mut self, namespace: &str) -> usize {
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return 0;
        };
        let removed = ns.mappings.len();
        ns.mappings.clear();
        if ns.is_empty() {
            self.namespaces.remove(namespace);
        }
        removed
    }

    /// Removes every game of a namespace, returning how many.
    pub fn delete_games(&mut self, namespace: &str) -> usize {
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return 0;
        };
        let removed = ns.game_count();
        ns.games_by_date.clear();
        if ns.is_empty() {
            self.namespaces.remove(namespace);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;

    fn batch(ns: &str, ops: Vec<WriteOp>) -> WriteBatch {
        WriteBatch {
            namespace: ns.to_string(),
            ops,
        }
    }

    #[test]
    fn duplicate_game_in_batch_rejects_whole_batch() {
        let mut tables = LeagueTables::new();
        let err = tables
            .apply(&batch(
                "ns",
                vec![
                    WriteOp::InsertMappingIfAbsent(MappingEntry::identity("A")),
                    WriteOp::InsertGame(Game::new(1, "A", "B")),
                    WriteOp::InsertGame(Game::new(1, "B", "A")),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(_)));
        assert_eq!(tables.row_counts(), (0, 0));
        assert_eq!(tables.namespace_count(), 0);
    }

    #[test]
    fn opponents_are_found_in_both_orientations_and_sorted() {
        let mut tables = LeagueTables::new();
        tables
            .apply(&batch(
                "ns",
                vec![
                    WriteOp::InsertGame(Game::new(1, "A", "Z")),
                    WriteOp::InsertGame(Game::new(1, "M", "A")),
                    WriteOp::InsertGame(Game::new(2, "A", "B")),
                ],
            ))
            .unwrap();
        assert_eq!(tables.opponents("ns", 1, "A"), vec!["M", "Z"]);
        assert_eq!(tables.opponents("ns", 2, "B"), vec!["A"]);
        assert!(tables.opponents("ns", 3, "A").is_empty());
        assert!(tables.opponents("other", 1, "A").is_empty());
    }

    #[test]
    fn insert_if_absent_never_overwrites_but_upsert_does() {
        let mut tables = LeagueTables::new();
        tables
            .apply(&batch("ns", vec![WriteOp::UpsertMapping(MappingEntry::new("X", "A"))]))
            .unwrap();

        let outcome = tables
            .apply(&batch(
                "ns",
                vec![WriteOp::InsertMappingIfAbsent(MappingEntry::identity("X"))],
            ))
            .unwrap();
        assert_eq!(outcome.mappings_inserted, 0);
        assert_eq!(tables.mapping("ns", "X").as_deref(), Some("A"));

        let outcome = tables
            .apply(&batch("ns", vec![WriteOp::UpsertMapping(MappingEntry::new("X", "B"))]))
            .unwrap();
        assert_eq!(outcome.mappings_updated, 1);
        assert_eq!(tables.mapping("ns", "X").as_deref(), Some("B"));
    }

    #[test]
    fn deletes_are_namespace_scoped() {
        let mut tables = LeagueTables::new();
        for ns in ["a", "b"] {
            tables
                .apply(&batch(
                    ns,
                    vec![
                        WriteOp::InsertGame(Game::new(1, "A", "B")),
                        WriteOp::InsertMappingIfAbsent(MappingEntry::identity("A")),
                    ],
                ))
                .unwrap();
        }
        assert_eq!(tables.delete_mappings("a"), 1);
        assert_eq!(tables.delete_games("a"), 1);
        assert_eq!(tables.namespace_count(), 1);
        assert_eq!(tables.games("b"), vec![Game::new(1, "A", "B")]);
    }
}
