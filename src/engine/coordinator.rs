//! Reader/writer coordination between engine calls.
//!
//! Mutating calls (register, resolve, erase) hold a lock exclusively;
//! lookups hold it shared. With [`LockScope::Namespace`] every namespace
//! gets its own lock, created on first use, so unrelated namespaces never
//! contend. [`LockScope::Process`] uses one lock for everything.
//!
//! The locks order calls and guard no data, so poisoned locks are
//! recovered.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Granularity of the engine's locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One lock per namespace.
    #[default]
    Namespace,
    /// A single process-wide lock.
    Process,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace => f.write_str("namespace"),
            Self::Process => f.write_str("process"),
        }
    }
}

impl FromStr for LockScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" => Ok(Self::Namespace),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown lock scope '{other}' (expected namespace|process)")),
        }
    }
}

/// Hands out shared and exclusive sections keyed by namespace.
pub struct LockCoordinator {
    scope: LockScope,
    process: Arc<RwLock<()>>,
    namespaces: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockCoordinator {
    /// Creates a coordinator with the given scope.
    #[must_use]
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            process: Arc::new(RwLock::new(())),
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// The configured scope.
    #[must_use]
    pub const fn scope(&self) -> LockScope {
        self.scope
    }

    /// Number of namespace locks created so far.
    #[must_use]
    pub fn namespace_locks(&self) -> usize {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_for(&self, namespace: &str) -> Arc<RwLock<()>> {
        match self.scope {
            LockScope::Process => Arc::clone(&self.process),
            LockScope::Namespace => {
                let mut registry = self
                    .namespaces
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // Entries are never removed: a caller may still hold the
                // old Arc, and a fresh lock would let two writers in.
                Arc::clone(registry.entry(namespace.to_string()).or_default())
            }
        }
    }

    /// Runs `f` while holding `namespace`'s lock exclusively.
    pub fn with_exclusive<T>(&self, namespace: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(namespace);
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Runs `f` while holding `namespace`'s lock shared.
    pub fn with_shared<T>(&self, namespace: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(namespace);
        let _guard = lock.read().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(LockScope::default())
    }
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("scope", &self.scope)
            .field("namespace_locks", &self.namespace_locks())
            .finish()
    }
}
