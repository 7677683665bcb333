//! Secondary→primary team correspondences.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A persisted correspondence: secondary-season name `secondary` is the
/// primary-season team `primary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Alias used in the secondary season.
    pub secondary: String,
    /// Authoritative primary-season identity.
    pub primary: String,
}

impl MappingEntry {
    /// Creates a new mapping entry.
    pub fn new(secondary: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            secondary: secondary.into(),
            primary: primary.into(),
        }
    }

    /// Identity mapping `team → team`.
    pub fn identity(team: impl Into<String>) -> Self {
        let team = team.into();
        Self {
            secondary: team.clone(),
            primary: team,
        }
    }

    /// Returns true if this maps a team to itself.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.secondary == self.primary
    }
}

/// The correspondence supplied to bootstrap a resolution.
///
/// `primary` is optional on the wire; a seed without it is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    /// Secondary-season name being seeded.
    pub secondary: String,
    /// Primary identity it corresponds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
}

impl Seed {
    /// Creates a complete seed.
    pub fn new(secondary: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            secondary: secondary.into(),
            primary: Some(primary.into()),
        }
    }

    /// Validates the seed and returns it as a mapping entry.
    pub fn to_entry(&self) -> Result<MappingEntry, ValidationError> {
        let Some(primary) = self.primary.as_deref() else {
            return Err(ValidationError::MissingSeedPrimary {
                secondary: self.secondary.clone(),
            });
        };
        if self.secondary.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "seed.secondary".to_string(),
            });
        }
        if primary.trim().is_empty() {
            return Err(ValidationError::MissingSeedPrimary {
                secondary: self.secondary.clone(),
            });
        }
        Ok(MappingEntry::new(self.secondary.clone(), primary))
    }
}

/// Result row of a lookup: `primary` is `None` when the name is unmapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingLookup {
    /// The requested secondary name.
    pub secondary: String,
    /// The mapped primary identity, if any.
    pub primary: Option<String>,
}
