//! Storage backends for teamlink.
//!
//! [`LeagueStore`] is the abstract interface; [`InMemoryLeagueStore`] and
//! (with the `persistent` feature) [`PersistentLeagueStore`] implement it.

mod memory;
mod tables;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryLeagueStore;
pub use tables::{LeagueTables, NamespaceTables};
pub use traits::{BatchOutcome, LeagueStore, StorageError, WriteBatch, WriteOp};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, CompactionResult, PersistentConfig, PersistentLeagueStore};
