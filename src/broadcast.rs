//! Cross-session invalidation broadcaster.
//!
//! Whenever upstream data is known to have changed (a discovery merge,
//! an explicit revert), every active session's cached view of the
//! affected heading is dropped so the next read re-fetches instead of
//! serving stale headings.
//!
//! The broadcast is best-effort: a failure on one session partition is
//! logged and skipped, never escalated. A missed invalidation only
//! causes a later stale read, not data corruption. The sweep reaches
//! sessions registered with this worker's registry; cross-worker
//! propagation is the host's concern, via the event tap.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::{EventBus, InvalidationEvent};
use crate::record::{Heading, PatientId};
use crate::session::SessionRegistry;
use crate::store::DocumentStore;

/// Best-effort invalidation fan-out over the active session partitions.
pub struct InvalidationBroadcaster {
    store: Arc<dyn DocumentStore>,
    registry: Arc<dyn SessionRegistry>,
    events: Arc<EventBus>,
}

impl InvalidationBroadcaster {
    /// Creates a broadcaster over the given store and registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<dyn SessionRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
        }
    }

    /// The event bus this broadcaster publishes to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Deletes the cached entries matching `(host, patient, heading)`
    /// from every active session's partition, then drops each
    /// partition's by-heading subtree for `heading`.
    pub fn delete(&self, host: &str, patient: &PatientId, heading: &Heading) {
        let sessions = self.registry.active_sessions();
        debug!(
            host,
            patient = %patient,
            heading = %heading,
            sessions = sessions.len(),
            "broadcasting cache invalidation"
        );

        for session in sessions {
            let cache = session.cache(Arc::clone(&self.store));
            if let Err(err) = cache.delete_all(host, patient, heading) {
                warn!(
                    session = %session.id(),
                    heading = %heading,
                    error = %err,
                    "session cache invalidation failed; continuing"
                );
                continue;
            }
            if let Err(err) = cache.delete_heading(heading) {
                warn!(
                    session = %session.id(),
                    heading = %heading,
                    error = %err,
                    "session heading sweep failed; continuing"
                );
            }
        }

        self.events.publish(&InvalidationEvent {
            host: host.to_string(),
            patient_id: patient.clone(),
            heading: heading.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::session::{InMemorySessionRegistry, SessionId};
    use crate::store::InMemoryDocumentStore;

    fn record(sid: &str) -> Record {
        Record::builder()
            .source_id(sid)
            .patient_id(9_999_999_000_i64)
            .heading("procedures")
            .host("ethercis")
            .date(1_700_000_000_000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_delete_sweeps_every_active_session() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let a = registry.touch(SessionId::new());
        let b = registry.touch(SessionId::new());

        let r = record("ethercis-1");
        a.cache(Arc::clone(&store)).put(&r).unwrap();
        b.cache(Arc::clone(&store)).put(&r).unwrap();

        let broadcaster = InvalidationBroadcaster::new(
            Arc::clone(&store),
            registry,
            Arc::new(EventBus::new()),
        );
        broadcaster.delete("ethercis", &r.patient_id, &r.heading);

        assert!(a.cache(Arc::clone(&store)).get(&r.source_id).unwrap().is_none());
        assert!(b.cache(Arc::clone(&store)).get(&r.source_id).unwrap().is_none());
    }

    #[test]
    fn test_delete_leaves_other_headings_alone() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let session = registry.touch(SessionId::new());

        let procedures = record("ethercis-1");
        let mut vaccinations = record("ethercis-2");
        vaccinations.heading = "vaccinations".into();
        let cache = session.cache(Arc::clone(&store));
        cache.put(&procedures).unwrap();
        cache.put(&vaccinations).unwrap();

        let broadcaster = InvalidationBroadcaster::new(
            Arc::clone(&store),
            registry,
            Arc::new(EventBus::new()),
        );
        broadcaster.delete("ethercis", &procedures.patient_id, &procedures.heading);

        assert!(cache.get(&procedures.source_id).unwrap().is_none());
        assert!(cache.get(&vaccinations.source_id).unwrap().is_some());
    }

    #[test]
    fn test_delete_publishes_one_event() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let events = Arc::new(EventBus::new());
        let stream = events.subscribe(4);

        let broadcaster = InvalidationBroadcaster::new(store, registry, events);
        let patient = PatientId::from(9_999_999_000_i64);
        let heading = Heading::from("procedures");
        broadcaster.delete("ethercis", &patient, &heading);

        let event = stream.try_recv().unwrap();
        assert_eq!(event.host, "ethercis");
        assert_eq!(event.patient_id, patient);
        assert_eq!(event.heading, heading);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_delete_with_no_sessions_is_harmless() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let broadcaster =
            InvalidationBroadcaster::new(store, registry, Arc::new(EventBus::new()));
        broadcaster.delete(
            "ethercis",
            &PatientId::from(9_999_999_000_i64),
            &Heading::from("procedures"),
        );
    }
}
