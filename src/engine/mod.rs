//! Execution engine for teamlink requests.
//!
//! [`LinkEngine`] applies [`Request`]s against a pluggable [`LeagueStore`].
//! It is synchronous; [`runtime::LinkRuntime`] runs it on worker threads.
//! Mutating operations hold their namespace exclusively for the whole
//! call, lookups hold it shared (see [`LockCoordinator`]).

mod context;
mod coordinator;
mod registrar;
mod resolver;

/// Worker pools that run the engine off the caller's thread.
pub mod runtime;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ExecutionError, LinkResult, Table};
use crate::game::{validate_namespace, Game};
use crate::mapping::{MappingLookup, Seed};
use crate::request::{Request, Response};
use crate::storage::LeagueStore;

pub use context::OperationContext;
pub use coordinator::{LockCoordinator, LockScope};
pub use registrar::RegisterOutcome;
pub use resolver::{propagate, AmbiguityPolicy, Propagation, Resolution};

/// Engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Granularity of the reader/writer locks.
    pub lock_scope: LockScope,
    /// Tie-break when a lookup finds several opponents.
    pub ambiguity: AmbiguityPolicy,
}

/// Result of erasing a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseOutcome {
    /// Mapping rows removed.
    pub mappings_deleted: usize,
    /// Game rows removed.
    pub games_deleted: usize,
}

/// teamlink execution engine.
///
/// Cheap to clone; clones share the store and the lock coordinator.
#[derive(Clone)]
pub struct LinkEngine {
    store: Arc<dyn LeagueStore>,
    coordinator: Arc<LockCoordinator>,
    config: EngineConfig,
}

impl LinkEngine {
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn LeagueStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn LeagueStore>, config: EngineConfig) -> Self {
        Self {
            store,
            coordinator: Arc::new(LockCoordinator::new(config.lock_scope)),
            config,
        }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<dyn LeagueStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The lock coordinator shared by every clone of this engine.
    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// Execute a request.
    pub fn execute(&self, request: Request, ctx: &OperationContext) -> LinkResult<Response> {
        debug!(
            op = request.name(),
            namespace = request.namespace(),
            request_id = %ctx.request_id(),
            "executing request"
        );
        match request {
            Request::RegisterPrimarySeason { namespace, games } => self
                .register_primary_season(&namespace, &games, ctx)
                .map(Response::Register),
            Request::ResolveSecondarySeason {
                namespace,
                seed,
                games,
            } => self
                .resolve_secondary_season(&namespace, &seed, &games, ctx)
                .map(Response::Resolve),
            Request::LookupMappings { namespace, teams } => self
                .lookup_mappings(&namespace, &teams)
                .map(|mappings| Response::Lookup { mappings }),
            Request::EraseNamespace { namespace } => {
                self.erase_namespace(&namespace, ctx).map(Response::Erase)
            }
        }
    }

    /// Record primary-season games and seed identity mappings for their teams.
    ///
    /// Idempotent: games already stored under either orientation are skipped,
    /// and existing mappings are never overwritten. The whole call is one
    /// atomic write.
    pub fn register_primary_season(
        &self,
        namespace: &str,
        games: &[Game],
        ctx: &OperationContext,
    ) -> LinkResult<RegisterOutcome> {
        validate_namespace(namespace)?;
        games.iter().try_for_each(Game::validate)?;

        let outcome = self.coordinator.with_exclusive(namespace, || {
            registrar::register(self.store.as_ref(), namespace, games, ctx)
        })?;

        info!(
            namespace,
            request_id = %ctx.request_id(),
            games_inserted = outcome.games_inserted,
            games_skipped = outcome.games_skipped,
            identities_seeded = outcome.identities_seeded,
            "registered primary season"
        );
        Ok(outcome)
    }

    /// Derive secondary-season identities from `seed` and persist them.
    ///
    /// Derived mappings, and the seed when it changes the stored mapping,
    /// are committed together or not at all.
    pub fn resolve_secondary_season(
        &self,
        namespace: &str,
        seed: &Seed,
        games: &[Game],
        ctx: &OperationContext,
    ) -> LinkResult<Resolution> {
        let seed = seed.to_entry()?;
        validate_namespace(namespace)?;
        games.iter().try_for_each(Game::validate)?;

        let resolution = self.coordinator.with_exclusive(namespace, || {
            resolver::resolve(
                self.store.as_ref(),
                namespace,
                &seed,
                games,
                self.config.ambiguity,
                ctx,
            )
        })?;

        info!(
            namespace,
            request_id = %ctx.request_id(),
            derived = resolution.derived.len(),
            unmapped = resolution.unmapped_games.len(),
            ambiguous = resolution.ambiguous_games.len(),
            passes = resolution.passes,
            seed_written = resolution.seed_written,
            "resolved secondary season"
        );
        Ok(resolution)
    }

    /// Look up the primary identity of each name, preserving order and
    /// duplicates. Unknown names map to `None`.
    pub fn lookup_mappings(&self, namespace: &str, teams: &[String]) -> LinkResult<Vec<MappingLookup>> {
        validate_namespace(namespace)?;

        self.coordinator.with_shared(namespace, || {
            teams
                .iter()
                .map(|team| -> LinkResult<MappingLookup> {
                    let primary = self.store.mapping(namespace, team).map_err(|e| {
                        ExecutionError::StoreRead {
                            table: Table::Mapping,
                            message: e.to_string(),
                        }
                    })?;
                    Ok(MappingLookup {
                        secondary: team.clone(),
                        primary,
                    })
                })
                .collect::<LinkResult<Vec<_>>>()
        })
    }

    /// Delete every mapping, then every game, of `namespace`.
    ///
    /// The two deletes are separate writes: if the second fails the
    /// mappings stay deleted.
    pub fn erase_namespace(&self, namespace: &str, ctx: &OperationContext) -> LinkResult<EraseOutcome> {
        validate_namespace(namespace)?;

        let outcome = self.coordinator.with_exclusive(namespace, || -> LinkResult<EraseOutcome> {
            ctx.checkpoint()?;
            let mappings_deleted = self.store.delete_mappings(namespace).map_err(|e| {
                ExecutionError::EraseFailed {
                    table: Table::Mapping,
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                }
            })?;
            let games_deleted = self.store.delete_games(namespace).map_err(|e| {
                ExecutionError::EraseFailed {
                    table: Table::PrimaryGames,
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                }
            })?;
            Ok(EraseOutcome {
                mappings_deleted,
                games_deleted,
            })
        })?;

        info!(
            namespace,
            request_id = %ctx.request_id(),
            mappings_deleted = outcome.mappings_deleted,
            games_deleted = outcome.games_deleted,
            "erased namespace"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::{LinkError, ValidationError};
    use crate::storage::InMemoryLeagueStore;

    fn engine() -> LinkEngine {
        LinkEngine::new(Arc::new(InMemoryLeagueStore::new()))
    }

    fn names(teams: &[&str]) -> Vec<String> {
        teams.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn register_then_lookup_returns_identity_mappings() {
        let engine = engine();
        let ctx = OperationContext::new();
        engine
            .register_primary_season("ns", &[Game::new(1, "A", "B")], &ctx)
            .unwrap();

        let found = engine.lookup_mappings("ns", &names(&["A", "B", "Q", "A"])).unwrap();
        let primaries: Vec<Option<&str>> = found.iter().map(|m| m.primary.as_deref()).collect();
        assert_eq!(primaries, vec![Some("A"), Some("B"), None, Some("A")]);
        assert_eq!(found[2].secondary, "Q");
    }

    #[test]
    fn resolve_persists_derived_mappings() {
        let engine = engine();
        let ctx = OperationContext::new();
        engine
            .register_primary_season("ns", &[Game::new(1, "A", "B")], &ctx)
            .unwrap();

        let resolution = engine
            .resolve_secondary_season("ns", &Seed::new("X", "A"), &[Game::new(1, "X", "Y")], &ctx)
            .unwrap();
        assert!(resolution.unmapped_games.is_empty());
        assert!(resolution.seed_written);
        assert_eq!(resolution.derived, vec![crate::mapping::MappingEntry::new("Y", "B")]);

        let found = engine.lookup_mappings("ns", &names(&["X", "Y"])).unwrap();
        assert_eq!(found[0].primary.as_deref(), Some("A"));
        assert_eq!(found[1].primary.as_deref(), Some("B"));
    }

    #[test]
    fn resolve_rejects_seed_without_primary_before_touching_the_store() {
        let engine = engine();
        let seed = Seed {
            secondary: "X".to_string(),
            primary: None,
        };
        let err = engine
            .resolve_secondary_season("ns", &seed, &[], &OperationContext::new())
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Validation(ValidationError::MissingSeedPrimary { .. })
        ));
        assert_eq!(err.status(), "Invalid initial seed");
        assert!(engine.store().mappings("ns").unwrap().is_empty());
    }

    #[test]
    fn erase_reports_deleted_rows() {
        let engine = engine();
        let ctx = OperationContext::new();
        engine
            .register_primary_season("ns", &[Game::new(1, "A", "B"), Game::new(2, "A", "C")], &ctx)
            .unwrap();
        engine
            .register_primary_season("other", &[Game::new(1, "A", "B")], &ctx)
            .unwrap();

        let outcome = engine.erase_namespace("ns", &ctx).unwrap();
        assert_eq!(
            outcome,
            EraseOutcome {
                mappings_deleted: 3,
                games_deleted: 2,
            }
        );
        assert_eq!(engine.store().games("other").unwrap().len(), 1);
    }

    #[test]
    fn execute_dispatches_by_request() {
        let engine = engine();
        let ctx = OperationContext::new();
        let response = engine
            .execute(
                Request::RegisterPrimarySeason {
                    namespace: "ns".to_string(),
                    games: vec![Game::new(1, "A", "B")],
                },
                &ctx,
            )
            .unwrap();
        let Response::Register(outcome) = response else {
            panic!("expected register response, got {response:?}");
        };
        assert_eq!(outcome.games_inserted, 1);

        let err = engine
            .execute(
                Request::EraseNamespace {
                    namespace: String::new(),
                },
                &ctx,
            )
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn config_round_trips_through_serde_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"ambiguity":"skip"}"#).unwrap();
        assert_eq!(config.ambiguity, AmbiguityPolicy::Skip);
        assert_eq!(config.lock_scope, LockScope::Namespace);
    }
}
