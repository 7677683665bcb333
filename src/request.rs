//! Typed request/response envelope for the engine.
//!
//! A [`Request`] names one engine operation with its inputs. Every entry
//! point (in-process calls, the worker runtime, the gRPC service) funnels
//! through this type, and [`Request::validate`] is the one place input
//! shape is checked.

use serde::{Deserialize, Serialize};

use crate::engine::{EraseOutcome, RegisterOutcome, Resolution};
use crate::error::ValidationError;
use crate::game::{validate_namespace, Game};
use crate::mapping::{MappingLookup, Seed};

/// An engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Ingest primary-season games.
    RegisterPrimarySeason {
        /// Target namespace.
        namespace: String,
        /// Games to record.
        games: Vec<Game>,
    },
    /// Derive secondary-season identities from a seed.
    ResolveSecondarySeason {
        /// Target namespace.
        namespace: String,
        /// Known starting correspondence.
        seed: Seed,
        /// Secondary schedule.
        games: Vec<Game>,
    },
    /// Read mappings for a list of secondary names.
    LookupMappings {
        /// Target namespace.
        namespace: String,
        /// Names to look up, in output order.
        teams: Vec<String>,
    },
    /// Delete every row of a namespace.
    EraseNamespace {
        /// Target namespace.
        namespace: String,
    },
}

/// Result of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    /// Result of a `RegisterPrimarySeason`.
    Register(RegisterOutcome),
    /// Result of a `ResolveSecondarySeason`.
    Resolve(Resolution),
    /// Result of a `LookupMappings`.
    Lookup {
        /// One entry per requested name, in request order.
        mappings: Vec<MappingLookup>,
    },
    /// Result of an `EraseNamespace`.
    Erase(EraseOutcome),
}

/// Whether an operation only reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read-only; may share the namespace with other readers.
    Read,
    /// Mutating; needs the namespace exclusively.
    Write,
}

impl Request {
    /// The namespace the request targets.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::RegisterPrimarySeason { namespace, .. }
            | Self::ResolveSecondarySeason { namespace, .. }
            | Self::LookupMappings { namespace, .. }
            | Self::EraseNamespace { namespace } => namespace,
        }
    }

    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterPrimarySeason { .. } => "register_primary_season",
            Self::ResolveSecondarySeason { .. } => "resolve_secondary_season",
            Self::LookupMappings { .. } => "lookup_mappings",
            Self::EraseNamespace { .. } => "erase_namespace",
        }
    }

    /// Whether the request mutates the store.
    #[must_use]
    pub const fn access(&self) -> Access {
        match self {
            Self::LookupMappings { .. } => Access::Read,
            Self::RegisterPrimarySeason { .. }
            | Self::ResolveSecondarySeason { .. }
            | Self::EraseNamespace { .. } => Access::Write,
        }
    }

    /// Checks the request's inputs.
    ///
    /// A seed without a primary identity is reported before any other
    /// problem with a resolve request.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::RegisterPrimarySeason { namespace, games } => {
                validate_namespace(namespace)?;
                validate_games(games)
            }
            Self::ResolveSecondarySeason {
                namespace,
                seed,
                games,
            } => {
                seed.to_entry()?;
                validate_namespace(namespace)?;
                validate_games(games)
            }
            Self::LookupMappings { namespace, .. } | Self::EraseNamespace { namespace } => {
                validate_namespace(namespace)
            }
        }
    }
}

fn validate_games(games: &[Game]) -> Result<(), ValidationError> {
    games.iter().try_for_each(Game::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_the_only_read() {
        let lookup = Request::LookupMappings {
            namespace: "ns".to_string(),
            teams: vec![],
        };
        let erase = Request::EraseNamespace {
            namespace: "ns".to_string(),
        };
        assert_eq!(lookup.access(), Access::Read);
        assert_eq!(erase.access(), Access::Write);
        assert_eq!(erase.namespace(), "ns");
    }

    #[test]
    fn missing_seed_primary_wins_over_other_problems() {
        let request = Request::ResolveSecondarySeason {
            namespace: String::new(),
            seed: Seed {
                secondary: "X".to_string(),
                primary: None,
            },
            games: vec![Game::new(1, "A", "A")],
        };
        assert!(matches!(
            request.validate(),
            Err(ValidationError::MissingSeedPrimary { .. })
        ));
    }

    #[test]
    fn self_games_are_rejected() {
        let request = Request::RegisterPrimarySeason {
            namespace: "ns".to_string(),
            games: vec![Game::new(1, "A", "B"), Game::new(2, "C", "C")],
        };
        assert!(matches!(request.validate(), Err(ValidationError::SelfGame { date: 2, .. })));
    }

    #[test]
    fn requests_serialize_with_an_op_tag() {
        let request = Request::EraseNamespace {
            namespace: "ns".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["op"], "erase_namespace");
        let back: Request = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}
