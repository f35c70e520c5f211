//! Session partition registry.
//!
//! Each active client context owns a physically disjoint cache
//! partition: the same index schema, rooted at a per-session key-path
//! prefix. Only the read-serving heading cache is partitioned; the
//! canonical record store, status records, and discovery links live at
//! global prefixes.
//!
//! The registry is an injected interface, not a process-wide singleton:
//! the core depends on [`SessionRegistry`] and the host application
//! supplies the concrete implementation. Session expiry is likewise the
//! host's responsibility.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::RecordCache;
use crate::path;
use crate::store::{DocumentStore, KeyPath};

/// Identifies one active client context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session id from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one session's cache partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
    cache_root: KeyPath,
}

impl SessionHandle {
    /// Creates a handle for `id`, rooting the partition at the standard
    /// per-session prefix.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            cache_root: path!["sessions", id.to_string(), "cache"],
            id,
        }
    }

    /// The session's id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// The partition's root prefix.
    #[must_use]
    pub fn cache_root(&self) -> &KeyPath {
        &self.cache_root
    }

    /// Constructs this session's cache view over `store`.
    #[must_use]
    pub fn cache(&self, store: Arc<dyn DocumentStore>) -> RecordCache {
        RecordCache::new(store, self.cache_root.clone())
    }
}

/// The registry of currently active sessions.
///
/// Implementations must be cheap to enumerate: the invalidation
/// broadcaster walks `active_sessions` on every upstream change.
pub trait SessionRegistry: Send + Sync {
    /// Handles for every currently active session.
    fn active_sessions(&self) -> Vec<SessionHandle>;

    /// Registers `id` on first contact; repeated touches are no-ops.
    /// Returns the session's handle.
    fn touch(&self, id: SessionId) -> SessionHandle;
}

/// In-memory session registry.
#[derive(Default)]
pub struct InMemorySessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, SessionHandle>>,
}

impl InMemorySessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    /// True if no sessions are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionRegistry for InMemorySessionRegistry {
    fn active_sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .map_or_else(|_| Vec::new(), |sessions| sessions.values().cloned().collect())
    }

    fn touch(&self, id: SessionId) -> SessionHandle {
        if let Ok(sessions) = self.sessions.read() {
            if let Some(handle) = sessions.get(&id) {
                return handle.clone();
            }
        }
        let handle = SessionHandle::new(id);
        if let Ok(mut sessions) = self.sessions.write() {
            return sessions.entry(id).or_insert_with(|| handle.clone()).clone();
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    #[test]
    fn test_touch_registers_once() {
        let registry = InMemorySessionRegistry::new();
        assert!(registry.is_empty());

        let id = SessionId::new();
        let first = registry.touch(id);
        let second = registry.touch(id);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_active_sessions_enumerates_all() {
        let registry = InMemorySessionRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.touch(a);
        registry.touch(b);

        let active = registry.active_sessions();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|handle| handle.id() == a));
        assert!(active.iter().any(|handle| handle.id() == b));
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let a = SessionHandle::new(SessionId::new());
        let b = SessionHandle::new(SessionId::new());
        assert_ne!(a.cache_root(), b.cache_root());

        let record = crate::record::Record::builder()
            .source_id("ethercis-1")
            .patient_id("p1")
            .heading("procedures")
            .host("ethercis")
            .date(1_700_000_000_000)
            .build()
            .unwrap();
        a.cache(Arc::clone(&store)).put(&record).unwrap();

        assert!(a
            .cache(Arc::clone(&store))
            .get(&record.source_id)
            .unwrap()
            .is_some());
        assert!(b
            .cache(Arc::clone(&store))
            .get(&record.source_id)
            .unwrap()
            .is_none());
    }
}
