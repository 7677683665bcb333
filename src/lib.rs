//! # teamlink - Cross-Season Team Identity Resolution
//!
//! teamlink maps the team names of a "secondary" season back to the
//! identities of an authoritative "primary" season. Primary games are
//! recorded verbatim; secondary names are inferred by matching who plays
//! whom on the same dates, starting from a single known correspondence
//! and propagating to a fixed point.
//!
//! ## Core Concepts
//!
//! - **Namespace**: isolation boundary; no data crosses namespaces
//! - **Game**: an unordered pairing of two teams on a date
//! - **Mapping**: a `secondary → primary` correspondence, unique per name
//! - **Seed**: the known correspondence a resolution starts from
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use teamlink::{Game, LinkEngine, OperationContext, Seed};
//! use teamlink::storage::InMemoryLeagueStore;
//!
//! let engine = LinkEngine::new(Arc::new(InMemoryLeagueStore::new()));
//! let ctx = OperationContext::new();
//!
//! engine.register_primary_season("league", &[Game::new(1, "Hawks", "Bears")], &ctx)?;
//! let resolution = engine.resolve_secondary_season(
//!     "league",
//!     &Seed::new("Falcons", "Hawks"),
//!     &[Game::new(1, "Falcons", "Grizzlies")],
//!     &ctx,
//! )?;
//! assert_eq!(resolution.derived[0].primary, "Bears");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod error;
pub mod game;
pub mod mapping;
pub mod request;
pub mod storage;

/// gRPC transport (feature `transport-grpc`).
#[cfg(feature = "transport-grpc")]
pub mod transport;

pub use engine::{
    AmbiguityPolicy, EngineConfig, EraseOutcome, LinkEngine, LockScope, OperationContext, RegisterOutcome,
    Resolution,
};
pub use engine::runtime::{ExecutionHandle, LinkRuntime, LinkRuntimeConfig};
pub use error::{ExecutionError, LinkError, LinkResult, Table, TransportError, ValidationError};
pub use game::{Game, GameKey};
pub use mapping::{MappingEntry, MappingLookup, Seed};
pub use request::{Request, Response};
pub use storage::{LeagueStore, StorageError};
