//! Secondary-season identity resolution.
//!
//! Resolution is a fixed-point sweep over the secondary schedule. A game
//! with exactly one side mapped is matched against the primary games played
//! that day by the mapped side's primary identity; the opponent found there
//! becomes the other side's identity. Mappings found during a sweep are
//! visible to the rest of that same sweep. Sweeps repeat until one adds
//! nothing, so every sweep but the last grows the mapping by at least one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, LinkError, LinkResult, Table};
use crate::game::Game;
use crate::mapping::MappingEntry;
use crate::storage::{LeagueStore, WriteBatch, WriteOp};

use super::context::OperationContext;

/// What to do when a day's primary schedule gives the mapped side several
/// opponents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Take the lexicographically smallest opponent.
    #[default]
    SmallestOpponent,
    /// Infer nothing from the game.
    Skip,
}

impl fmt::Display for AmbiguityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallestOpponent => f.write_str("smallest-opponent"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for AmbiguityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smallest-opponent" | "smallest_opponent" => Ok(Self::SmallestOpponent),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown ambiguity policy '{other}' (expected smallest-opponent|skip)"
            )),
        }
    }
}

/// Outcome of the propagation sweeps, before anything is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Propagation {
    /// Mappings discovered by the sweeps, keyed by secondary name.
    pub derived: BTreeMap<String, String>,
    /// Input games with a side still unmapped, in input order.
    pub unmapped: Vec<Game>,
    /// Input games whose lookup found more than one opponent, in input order.
    pub ambiguous: Vec<Game>,
    /// Sweeps performed, including the final one that changed nothing.
    pub passes: u32,
}

/// Runs the sweeps to a fixed point.
///
/// `working` starts as the stored mapping plus the seed and ends as the
/// converged mapping. `opponents(date, primary)` returns the distinct
/// opponents of `primary` in that day's primary games; an empty result is
/// not an error.
pub fn propagate<F>(
    working: &mut HashMap<String, String>,
    games: &[Game],
    policy: AmbiguityPolicy,
    ctx: &OperationContext,
    mut opponents: F,
) -> LinkResult<Propagation>
where
    F: FnMut(i32, &str) -> LinkResult<Vec<String>>,
{
    let mut derived = BTreeMap::new();
    let mut ambiguous_at: HashSet<usize> = HashSet::new();
    let mut passes = 0u32;

    loop {
        passes += 1;
        let mut changed = false;

        for (idx, game) in games.iter().enumerate() {
            ctx.checkpoint()?;

            let (known, unknown) = match (
                working.contains_key(&game.team_a),
                working.contains_key(&game.team_b),
            ) {
                (true, false) => (&game.team_a, &game.team_b),
                (false, true) => (&game.team_b, &game.team_a),
                _ => continue,
            };

            let primary = working[known].clone();
            let candidates = opponents(game.date, &primary)?;
            let chosen = match candidates.len() {
                0 => continue,
                1 => candidates.into_iter().next(),
                _ => {
                    ambiguous_at.insert(idx);
                    match policy {
                        AmbiguityPolicy::SmallestOpponent => candidates.into_iter().min(),
                        AmbiguityPolicy::Skip => None,
                    }
                }
            };
            let Some(opponent) = chosen else {
                continue;
            };

            working.insert(unknown.clone(), opponent.clone());
            derived.insert(unknown.clone(), opponent);
            changed = true;
        }

        if !changed {
            break;
        }
    }

    let unmapped = games
        .iter()
        .filter(|g| !working.contains_key(&g.team_a) || !working.contains_key(&g.team_b))
        .cloned()
        .collect();
    let ambiguous = games
        .iter()
        .enumerate()
        .filter(|(idx, _)| ambiguous_at.contains(idx))
        .map(|(_, g)| g.clone())
        .collect();

    Ok(Propagation {
        derived,
        unmapped,
        ambiguous,
        passes,
    })
}

/// Result of resolving a secondary season.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Input games with at least one side left unmapped.
    pub unmapped_games: Vec<Game>,
    /// Input games whose opponent lookup was ambiguous.
    pub ambiguous_games: Vec<Game>,
    /// Newly derived mappings, sorted by secondary name.
    pub derived: Vec<MappingEntry>,
    /// Sweeps performed.
    pub passes: u32,
    /// Whether the seed was written because the stored mapping differed.
    pub seed_written: bool,
}

fn read_err(table: Table) -> impl Fn(crate::storage::StorageError) -> LinkError {
    move |e| {
        ExecutionError::StoreRead {
            table,
            message: e.to_string(),
        }
        .into()
    }
}

/// Resolves `games` from `seed` and commits the result in one batch.
pub(crate) fn resolve(
    store: &dyn LeagueStore,
    namespace: &str,
    seed: &MappingEntry,
    games: &[Game],
    policy: AmbiguityPolicy,
    ctx: &OperationContext,
) -> LinkResult<Resolution> {
    let mut working = store.mappings(namespace).map_err(read_err(Table::Mapping))?;
    let stored_seed = working.insert(seed.secondary.clone(), seed.primary.clone());
    let seed_written = stored_seed.as_deref() != Some(seed.primary.as_str());

    let propagation = propagate(&mut working, games, policy, ctx, |date, primary| {
        store
            .opponents(namespace, date, primary)
            .map_err(read_err(Table::PrimaryGames))
    })?;
    ctx.checkpoint()?;

    let mut batch = WriteBatch::new(namespace);
    if seed_written {
        batch.push(WriteOp::UpsertMapping(seed.clone()));
    }
    let derived: Vec<MappingEntry> = propagation
        .derived
        .into_iter()
        .map(|(secondary, primary)| MappingEntry { secondary, primary })
        .collect();
    for entry in &derived {
        batch.push(WriteOp::UpsertMapping(entry.clone()));
    }

    if !batch.is_empty() {
        store
            .apply(batch)
            .map_err(|e| ExecutionError::TransactionAborted {
                table: Table::Mapping,
                message: e.to_string(),
            })?;
    }

    Ok(Resolution {
        unmapped_games: propagation.unmapped,
        ambiguous_games: propagation.ambiguous,
        derived,
        passes: propagation.passes,
        seed_written,
    })
}
