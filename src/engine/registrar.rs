//! Primary-season ingestion.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, LinkResult, Table};
use crate::game::{Game, GameKey};
use crate::mapping::MappingEntry;
use crate::storage::{LeagueStore, WriteBatch, WriteOp};

use super::context::OperationContext;

/// Result of registering a primary season.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    /// Games written to `primary_games`.
    pub games_inserted: usize,
    /// Games already stored, or repeated within the request.
    pub games_skipped: usize,
    /// Identity mappings created for teams without a mapping.
    pub identities_seeded: usize,
}

/// Builds the write batch for `games`.
///
/// Games already stored, or seen earlier in the same request under either
/// orientation, are skipped. Every distinct team gets an identity mapping
/// that the store only inserts when the team has no mapping yet.
fn plan(
    store: &dyn LeagueStore,
    namespace: &str,
    games: &[Game],
    ctx: &OperationContext,
) -> LinkResult<(WriteBatch, usize)> {
    let mut batch = WriteBatch::new(namespace);
    let mut accepted: HashSet<GameKey> = HashSet::with_capacity(games.len());
    let mut teams: BTreeSet<&str> = BTreeSet::new();
    let mut skipped = 0;

    for game in games {
        ctx.checkpoint()?;
        teams.insert(&game.team_a);
        teams.insert(&game.team_b);

        if accepted.contains(&game.key()) {
            skipped += 1;
            continue;
        }
        let exists = store
            .game_exists(namespace, game)
            .map_err(|e| ExecutionError::StoreRead {
                table: Table::PrimaryGames,
                message: e.to_string(),
            })?;
        if exists {
            skipped += 1;
            continue;
        }
        accepted.insert(game.key());
        batch.push(WriteOp::InsertGame(game.clone()));
    }

    for team in teams {
        batch.push(WriteOp::InsertMappingIfAbsent(MappingEntry::identity(team)));
    }
    Ok((batch, skipped))
}

/// Registers `games` as one atomic write.
pub(crate) fn register(
    store: &dyn LeagueStore,
    namespace: &str,
    games: &[Game],
    ctx: &OperationContext,
) -> LinkResult<RegisterOutcome> {
    let (batch, games_skipped) = plan(store, namespace, games, ctx)?;
    ctx.checkpoint()?;

    let table = if batch.ops.iter().any(|op| matches!(op, WriteOp::InsertGame(_))) {
        Table::PrimaryGames
    } else {
        Table::Mapping
    };
    let outcome = store
        .apply(batch)
        .map_err(|e| ExecutionError::StoreWrite {
            table,
            message: e.to_string(),
        })?;

    Ok(RegisterOutcome {
        games_inserted: outcome.games_inserted,
        games_skipped,
        identities_seeded: outcome.mappings_inserted,
    })
}
