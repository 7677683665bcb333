//! Games and namespaces.
//!
//! A game is an unordered pairing of two teams on a date: `(A, B)` and
//! `(B, A)` denote the same game. [`GameKey`] is the canonical form used
//! wherever games are compared or indexed.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length in bytes of a namespace.
pub const MAX_NAME_LEN: usize = 256;

/// A scheduled matchup between two teams on a date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Game {
    /// Date of the game. Opaque ordinal; only equality matters.
    pub date: i32,
    /// One side of the pairing.
    pub team_a: String,
    /// The other side of the pairing.
    pub team_b: String,
}

impl Game {
    /// Creates a new game.
    pub fn new(date: i32, team_a: impl Into<String>, team_b: impl Into<String>) -> Self {
        Self {
            date,
            team_a: team_a.into(),
            team_b: team_b.into(),
        }
    }

    /// Returns the orientation-independent key for this game.
    #[must_use]
    pub fn key(&self) -> GameKey {
        GameKey::new(self.date, &self.team_a, &self.team_b)
    }

    /// Validates team names. Names are opaque and unbounded; only blank
    /// names and self-games are rejected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.team_a.trim().is_empty() || self.team_b.trim().is_empty() {
            return Err(ValidationError::EmptyTeamName { date: self.date });
        }
        if self.team_a == self.team_b {
            return Err(ValidationError::SelfGame {
                date: self.date,
                team: self.team_a.clone(),
            });
        }
        Ok(())
    }
}

/// Canonical key of a game: the two team names in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameKey {
    /// Date of the game.
    pub date: i32,
    /// Lexicographically smaller team name.
    pub low: String,
    /// Lexicographically larger team name.
    pub high: String,
}

impl GameKey {
    /// Builds the canonical key for `(date, a, b)` regardless of orientation.
    #[must_use]
    pub fn new(date: i32, a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            date,
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

/// Validates a namespace partition key.
pub fn validate_namespace(namespace: &str) -> Result<(), ValidationError> {
    if namespace.is_empty() {
        return Err(ValidationError::EmptyNamespace);
    }
    if namespace.len() > MAX_NAME_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "namespace".to_string(),
            max_length: MAX_NAME_LEN,
        });
    }
    Ok(())
}
