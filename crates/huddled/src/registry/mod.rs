//! Registry of online sessions, keyed by display name.
//!
//! The registry is the only state shared across sessions. The map lives
//! behind a single `RwLock` and is never handed out, so every read and
//! write goes through the methods below.
//!
//! # Invariants
//!
//! - At most one session per name at any instant.
//! - A name is present iff its session is Online.
//! - A session's stored name always equals its registry key; `rename`
//!   updates both while holding the write lock.
//!
//! The lock is held only for map access. Callers that push lines to the
//! sessions they find (fan-out, presence replies) take a [`Registry::snapshot`]
//! and push after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::server::Session;

mod error;

pub use error::RegistryError;

/// Shared name -> session directory. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session under `name`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameConflict` if `name` is already present
    pub async fn insert(&self, name: &str, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(name) {
            return Err(RegistryError::NameConflict(name.to_string()));
        }

        sessions.insert(name.to_string(), session);
        debug!(name, online = sessions.len(), "Registered session");
        Ok(())
    }

    /// Removes whatever session is registered under `name`.
    pub async fn remove(&self, name: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(name);
        if removed.is_some() {
            debug!(name, online = sessions.len(), "Removed session");
        }
        removed
    }

    /// Removes `session` under its current name, if that entry is still it.
    ///
    /// Reading the name under the write lock means a concurrent rename
    /// cannot leave a stale entry behind.
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        let name = session.name();

        let owned = sessions
            .get(&name)
            .is_some_and(|entry| Arc::ptr_eq(entry, session));

        if owned {
            sessions.remove(&name);
            debug!(name = %name, online = sessions.len(), "Removed session");
        }
        owned
    }

    /// Finds the session registered under `name`.
    pub async fn lookup(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Moves the entry at `old` to `new` and updates the session's stored
    /// name, atomically with respect to every other registry operation.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameConflict` if `new` is taken (no change is made)
    /// - `RegistryError::NotFound` if nothing is registered under `old`
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(new) {
            return Err(RegistryError::NameConflict(new.to_string()));
        }

        let session = sessions
            .remove(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;

        session.set_name(new);
        sessions.insert(new.to_string(), session);
        debug!(old, new, "Renamed session");
        Ok(())
    }

    /// Copies out every `(name, session)` pair as of the moment the lock
    /// was taken. Order is unspecified.
    pub async fn snapshot(&self) -> Vec<(String, Arc<Session>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), Arc::clone(session)))
            .collect()
    }

    /// Number of online sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
