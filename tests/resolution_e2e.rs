//! End-to-end resolution scenarios against the in-memory store.

use std::sync::Arc;

use teamlink::storage::InMemoryLeagueStore;
use teamlink::{
    AmbiguityPolicy, EngineConfig, Game, LinkEngine, LinkRuntime, LinkRuntimeConfig, MappingEntry,
    OperationContext, Request, Response, Seed,
};

fn engine() -> LinkEngine {
    LinkEngine::new(Arc::new(InMemoryLeagueStore::new()))
}

fn games(rows: &[(i32, &str, &str)]) -> Vec<Game> {
    rows.iter().map(|(d, a, b)| Game::new(*d, *a, *b)).collect()
}

fn lookup(engine: &LinkEngine, namespace: &str, teams: &[&str]) -> Vec<Option<String>> {
    let teams: Vec<String> = teams.iter().map(|t| (*t).to_string()).collect();
    engine
        .lookup_mappings(namespace, &teams)
        .unwrap()
        .into_iter()
        .map(|m| m.primary)
        .collect()
}

fn some(name: &str) -> Option<String> {
    Some(name.to_string())
}

#[test]
fn registration_is_idempotent_under_either_orientation() {
    let engine = engine();
    let ctx = OperationContext::new();

    let first = engine
        .register_primary_season("league", &games(&[(1, "A", "B"), (2, "A", "C")]), &ctx)
        .unwrap();
    assert_eq!(first.games_inserted, 2);
    assert_eq!(first.identities_seeded, 3);

    let second = engine
        .register_primary_season("league", &games(&[(1, "B", "A"), (2, "A", "C")]), &ctx)
        .unwrap();
    assert_eq!(second.games_inserted, 0);
    assert_eq!(second.games_skipped, 2);
    assert_eq!(second.identities_seeded, 0);

    assert_eq!(engine.store().games("league").unwrap().len(), 2);
    assert_eq!(engine.store().mappings("league").unwrap().len(), 3);
}

#[test]
fn duplicate_within_one_batch_is_inserted_once() {
    let engine = engine();
    let outcome = engine
        .register_primary_season(
            "league",
            &games(&[(1, "A", "B"), (1, "B", "A")]),
            &OperationContext::new(),
        )
        .unwrap();
    assert_eq!(outcome.games_inserted, 1);
    assert_eq!(outcome.games_skipped, 1);
}

#[test]
fn registration_never_overwrites_an_existing_mapping() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season("league", &games(&[(1, "A", "B")]), &ctx)
        .unwrap();
    engine
        .resolve_secondary_season("league", &Seed::new("C", "A"), &[], &ctx)
        .unwrap();

    // C already maps to A; registering a game with C must not reset it.
    let outcome = engine
        .register_primary_season("league", &games(&[(2, "C", "D")]), &ctx)
        .unwrap();
    assert_eq!(outcome.identities_seeded, 1);
    assert_eq!(lookup(&engine, "league", &["C", "D"]), vec![some("A"), some("D")]);
}

#[test]
fn self_seed_resolves_the_primary_schedule_against_itself() {
    let engine = engine();
    let ctx = OperationContext::new();
    let schedule = games(&[(1, "A", "B"), (2, "B", "C")]);
    engine.register_primary_season("league", &schedule, &ctx).unwrap();

    let resolution = engine
        .resolve_secondary_season("league", &Seed::new("A", "A"), &schedule, &ctx)
        .unwrap();
    assert!(resolution.unmapped_games.is_empty());
    assert!(resolution.derived.is_empty());
    assert!(!resolution.seed_written);
}

#[test]
fn seed_infers_the_opponent_on_the_same_date() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season("league", &games(&[(1, "A", "B")]), &ctx)
        .unwrap();

    let resolution = engine
        .resolve_secondary_season("league", &Seed::new("X", "A"), &games(&[(1, "X", "Y")]), &ctx)
        .unwrap();
    assert_eq!(resolution.derived, vec![MappingEntry::new("Y", "B")]);
    assert!(resolution.unmapped_games.is_empty());
    assert_eq!(lookup(&engine, "league", &["X", "Y"]), vec![some("A"), some("B")]);
}

#[test]
fn propagation_chains_across_dates_in_one_call() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season(
            "league",
            &games(&[(1, "A", "B"), (2, "B", "C"), (3, "C", "D")]),
            &ctx,
        )
        .unwrap();

    // Listed last-hop first so each sweep can only add one link.
    let secondary = games(&[(3, "Z", "W"), (2, "Y", "Z"), (1, "X", "Y")]);
    let resolution = engine
        .resolve_secondary_season("league", &Seed::new("X", "A"), &secondary, &ctx)
        .unwrap();

    assert_eq!(
        resolution.derived,
        vec![
            MappingEntry::new("W", "D"),
            MappingEntry::new("Y", "B"),
            MappingEntry::new("Z", "C"),
        ]
    );
    assert_eq!(resolution.passes, 4);
    assert!(resolution.unmapped_games.is_empty());
    assert_eq!(
        lookup(&engine, "league", &["X", "Y", "Z", "W"]),
        vec![some("A"), some("B"), some("C"), some("D")]
    );
}

#[test]
fn unresolvable_games_are_reported_in_input_order() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season("league", &games(&[(1, "A", "B")]), &ctx)
        .unwrap();

    let secondary = games(&[(5, "P", "Q"), (1, "X", "Y"), (7, "X", "R")]);
    let resolution = engine
        .resolve_secondary_season("league", &Seed::new("X", "A"), &secondary, &ctx)
        .unwrap();

    assert_eq!(resolution.unmapped_games, games(&[(5, "P", "Q"), (7, "X", "R")]));
    assert_eq!(resolution.derived, vec![MappingEntry::new("Y", "B")]);
    assert_eq!(lookup(&engine, "league", &["P", "R"]), vec![None, None]);
}

#[test]
fn later_seed_overwrites_the_stored_mapping() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season("league", &games(&[(1, "A", "B"), (1, "C", "D")]), &ctx)
        .unwrap();
    engine
        .resolve_secondary_season("league", &Seed::new("X", "A"), &games(&[(1, "X", "Y")]), &ctx)
        .unwrap();
    assert_eq!(lookup(&engine, "league", &["X"]), vec![some("A")]);

    let resolution = engine
        .resolve_secondary_season("league", &Seed::new("X", "C"), &games(&[(1, "X", "Y")]), &ctx)
        .unwrap();
    assert!(resolution.seed_written);
    assert!(resolution.derived.is_empty());
    assert_eq!(lookup(&engine, "league", &["X", "Y"]), vec![some("C"), some("B")]);

    // Re-submitting the stored seed writes nothing.
    let again = engine
        .resolve_secondary_season("league", &Seed::new("X", "C"), &[], &ctx)
        .unwrap();
    assert!(!again.seed_written);
}

#[test]
fn ambiguous_opponents_follow_the_configured_policy() {
    let doubleheader = games(&[(1, "A", "C"), (1, "A", "B")]);
    let secondary = games(&[(1, "X", "Y")]);

    let smallest = engine();
    let ctx = OperationContext::new();
    smallest.register_primary_season("league", &doubleheader, &ctx).unwrap();
    let resolution = smallest
        .resolve_secondary_season("league", &Seed::new("X", "A"), &secondary, &ctx)
        .unwrap();
    assert_eq!(resolution.derived, vec![MappingEntry::new("Y", "B")]);
    assert_eq!(resolution.ambiguous_games, secondary);

    let skip = LinkEngine::with_config(
        Arc::new(InMemoryLeagueStore::new()),
        EngineConfig {
            ambiguity: AmbiguityPolicy::Skip,
            ..EngineConfig::default()
        },
    );
    skip.register_primary_season("league", &doubleheader, &ctx).unwrap();
    let resolution = skip
        .resolve_secondary_season("league", &Seed::new("X", "A"), &secondary, &ctx)
        .unwrap();
    assert!(resolution.derived.is_empty());
    assert_eq!(resolution.ambiguous_games, secondary);
    assert_eq!(resolution.unmapped_games, secondary);
}

#[test]
fn erase_removes_every_row_of_the_namespace_only() {
    let engine = engine();
    let ctx = OperationContext::new();
    for ns in ["league", "other"] {
        engine
            .register_primary_season(ns, &games(&[(1, "A", "B")]), &ctx)
            .unwrap();
        engine
            .resolve_secondary_season(ns, &Seed::new("X", "A"), &games(&[(1, "X", "Y")]), &ctx)
            .unwrap();
    }

    let outcome = engine.erase_namespace("league", &ctx).unwrap();
    assert_eq!(outcome.mappings_deleted, 4);
    assert_eq!(outcome.games_deleted, 1);

    assert_eq!(lookup(&engine, "league", &["A", "B", "X", "Y"]), vec![None, None, None, None]);
    assert!(engine.store().games("league").unwrap().is_empty());
    assert_eq!(lookup(&engine, "other", &["X", "Y"]), vec![some("A"), some("B")]);

    // Erasing again is a no-op, and the namespace can be reused.
    let outcome = engine.erase_namespace("league", &ctx).unwrap();
    assert_eq!((outcome.mappings_deleted, outcome.games_deleted), (0, 0));
    let outcome = engine
        .register_primary_season("league", &games(&[(1, "A", "B")]), &ctx)
        .unwrap();
    assert_eq!(outcome.games_inserted, 1);
}

#[test]
fn namespaces_do_not_share_games() {
    let engine = engine();
    let ctx = OperationContext::new();
    engine
        .register_primary_season("league", &games(&[(1, "A", "B")]), &ctx)
        .unwrap();

    let resolution = engine
        .resolve_secondary_season("elsewhere", &Seed::new("X", "A"), &games(&[(1, "X", "Y")]), &ctx)
        .unwrap();
    assert_eq!(resolution.unmapped_games, games(&[(1, "X", "Y")]));
    assert_eq!(lookup(&engine, "elsewhere", &["X", "Y"]), vec![some("A"), None]);
}

#[test]
fn invalid_input_mutates_nothing() {
    let engine = engine();
    let ctx = OperationContext::new();

    let err = engine
        .register_primary_season("league", &games(&[(1, "A", "B"), (2, "C", "C")]), &ctx)
        .unwrap_err();
    assert_eq!(err.status(), "Invalid request");
    assert!(engine.store().games("league").unwrap().is_empty());

    let seed = Seed {
        secondary: "X".to_string(),
        primary: None,
    };
    let err = engine
        .resolve_secondary_season("league", &seed, &games(&[(1, "X", "Y")]), &ctx)
        .unwrap_err();
    assert_eq!(err.status(), "Invalid initial seed");
    assert!(engine.store().mappings("league").unwrap().is_empty());
}

#[test]
fn requests_round_trip_through_the_runtime() {
    let runtime = LinkRuntime::new(engine(), LinkRuntimeConfig::default());

    let request: Request = serde_json::from_str(
        r#"{"op":"register_primary_season","namespace":"league",
            "games":[{"date":1,"team_a":"A","team_b":"B"}]}"#,
    )
    .unwrap();
    let Response::Register(outcome) = runtime.execute(request).unwrap() else {
        panic!("expected register response");
    };
    assert_eq!(outcome.games_inserted, 1);

    let response = runtime
        .execute(Request::ResolveSecondarySeason {
            namespace: "league".to_string(),
            seed: Seed::new("X", "A"),
            games: games(&[(1, "X", "Y")]),
        })
        .unwrap();
    let Response::Resolve(resolution) = response else {
        panic!("expected resolve response");
    };
    assert_eq!(resolution.derived, vec![MappingEntry::new("Y", "B")]);

    let response = runtime
        .execute(Request::LookupMappings {
            namespace: "league".to_string(),
            teams: vec!["Y".to_string(), "Q".to_string()],
        })
        .unwrap();
    let Response::Lookup { mappings } = response else {
        panic!("expected lookup response");
    };
    assert_eq!(mappings[0].primary.as_deref(), Some("B"));
    assert_eq!(mappings[1].primary, None);
}
