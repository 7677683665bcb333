//! Error types for teamlink.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failing phase (validation, store read, store write, commit) and
//! surface a human-readable status string.

use std::fmt;

use thiserror::Error;

/// Logical table touched by a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `primary_games(namespace, date, team_a, team_b)`.
    PrimaryGames,
    /// `mapping(namespace, secondary, primary)`.
    Mapping,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryGames => f.write_str("primary_games"),
            Self::Mapping => f.write_str("mapping"),
        }
    }
}

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The resolution seed names no primary identity.
    #[error("Seed for '{secondary}' has no primary identity")]
    MissingSeedPrimary {
        /// Secondary name the seed was given for.
        secondary: String,
    },

    /// The namespace is the empty string.
    #[error("Namespace cannot be empty")]
    EmptyNamespace,

    /// A game has a blank team name.
    #[error("Team name cannot be empty (game on date {date})")]
    EmptyTeamName {
        /// Date of the offending game.
        date: i32,
    },

    /// A game pairs a team with itself.
    #[error("Team '{team}' cannot play itself (date {date})")]
    SelfGame {
        /// Date of the offending game.
        date: i32,
        /// The team listed on both sides.
        team: String,
    },

    /// A required field is absent or blank.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Name of the field.
        field: String,
    },

    /// A field is longer than its limit.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Name of the field.
        field: String,
        /// Limit in bytes.
        max_length: usize,
    },
}

/// Execution errors that occur during operation execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A store read failed.
    #[error("Read from {table} failed: {message}")]
    StoreRead {
        /// Table being read.
        table: Table,
        /// Backend error text.
        message: String,
    },

    /// A store write failed before anything was committed.
    #[error("Write to {table} failed: {message}")]
    StoreWrite {
        /// Table being written.
        table: Table,
        /// Backend error text.
        message: String,
    },

    /// A write batch was rejected as a whole.
    #[error("Transaction on {table} aborted and rolled back: {message}")]
    TransactionAborted {
        /// Table the batch targeted.
        table: Table,
        /// Backend error text.
        message: String,
    },

    /// Deleting a namespace's rows failed.
    #[error("Deleting {table} rows for namespace '{namespace}' failed: {message}")]
    EraseFailed {
        /// Table whose rows were being deleted.
        table: Table,
        /// Namespace being erased.
        namespace: String,
        /// Backend error text.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled by caller")]
    Cancelled,

    /// The deadline passed before the operation finished.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// Configured deadline.
        duration_ms: u64,
    },

    /// The worker queue for a path has no free slot.
    #[error("{path} queue is full (capacity {capacity})")]
    QueueFull {
        /// `"read"` or `"write"`.
        path: String,
        /// Queue capacity.
        capacity: usize,
    },

    /// The workers for a path have shut down.
    #[error("{path} workers are disconnected")]
    Disconnected {
        /// `"read"` or `"write"`.
        path: String,
    },
}

/// Transport errors at the remote-call boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A blocking worker task panicked or was dropped.
    #[error("Worker task failed: {message}")]
    WorkerFailed {
        /// Join error text.
        message: String,
    },
}

/// Top-level error type for teamlink.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Input was rejected before any store access.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A store access or the runtime failed.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The remote-call boundary failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An invariant broke inside teamlink.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl LinkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Human-readable status naming the phase that failed.
    ///
    /// This is the string returned to remote callers in place of `"ok"`.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::MissingSeedPrimary { .. }) => "Invalid initial seed",
            Self::Validation(_) => "Invalid request",
            Self::Execution(e) => match e {
                ExecutionError::StoreRead { table: Table::PrimaryGames, .. } => "Read from database failed",
                ExecutionError::StoreRead { table: Table::Mapping, .. } => "Read from mapping database failed",
                ExecutionError::StoreWrite { table: Table::PrimaryGames, .. }
                | ExecutionError::TransactionAborted { table: Table::PrimaryGames, .. } => {
                    "Write to database failed"
                }
                ExecutionError::StoreWrite { table: Table::Mapping, .. }
                | ExecutionError::TransactionAborted { table: Table::Mapping, .. } => {
                    "Write to mapping database failed"
                }
                ExecutionError::EraseFailed { .. } => "Failed to delete namespace",
                ExecutionError::Cancelled => "Cancelled",
                ExecutionError::Timeout { .. } => "Timed out",
                ExecutionError::QueueFull { .. } => "Server busy",
                ExecutionError::Disconnected { .. } => "Server shutting down",
            },
            Self::Transport(TransportError::WorkerFailed { .. }) | Self::Internal { .. } => {
                "Internal error"
            }
        }
    }
}

/// Result type alias for teamlink operations.
pub type LinkResult<T> = Result<T, LinkError>;
