//! Engine facade: the function-call boundary handlers talk to.
//!
//! The engine wires the store, session registry, broadcaster, discovery
//! reconciliation, and status tracking together, and owns the input
//! validation that must happen before any mutation. It never formats
//! responses; callers get typed errors or plain data.
//!
//! Multi-step mutations are serialized behind one mutation gate so the
//! canonical-then-index write order and read-before-delete discipline
//! hold on a preemptive runtime.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::broadcast::InvalidationBroadcaster;
use crate::cache::{QueryOptions, RecordCache};
use crate::config::CacheConfig;
use crate::discovery::{
    DiscoveryEngine, DiscoveryRecord, LinkTable, MergeOutcome, RevertReceipt, FINISHED_SENTINEL,
};
use crate::error::{CacheError, CacheResult, ValidationError};
use crate::events::EventBus;
use crate::record::{Heading, PatientId, Record, SourceId};
use crate::session::{SessionId, SessionRegistry};
use crate::status::{StatusRecord, StatusTracker};
use crate::store::{DocumentStore, KeyPath};

/// The subsystem's inbound facade.
pub struct CacheEngine {
    store: Arc<dyn DocumentStore>,
    registry: Arc<dyn SessionRegistry>,
    config: CacheConfig,
    broadcaster: Arc<InvalidationBroadcaster>,
    discovery: DiscoveryEngine,
    mutation_gate: Mutex<()>,
}

impl CacheEngine {
    /// Creates an engine over the given store and session registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<dyn SessionRegistry>,
        config: CacheConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let broadcaster = Arc::new(InvalidationBroadcaster::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            events,
        ));
        let records = RecordCache::new(Arc::clone(&store), KeyPath::root());
        let discovery = DiscoveryEngine::new(Arc::clone(&store), records, Arc::clone(&broadcaster));
        Self {
            store,
            registry,
            config,
            broadcaster,
            discovery,
            mutation_gate: Mutex::new(()),
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The canonical record cache.
    #[must_use]
    pub fn records(&self) -> &RecordCache {
        self.discovery.records()
    }

    /// The discovery link table.
    #[must_use]
    pub fn links(&self) -> &LinkTable {
        self.discovery.links()
    }

    /// The per-patient status tracker.
    #[must_use]
    pub fn status(&self) -> &StatusTracker {
        self.discovery.status()
    }

    /// The invalidation event bus, for host-level subscriptions.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        self.broadcaster.events()
    }

    fn gate(&self) -> CacheResult<MutexGuard<'_, ()>> {
        self.mutation_gate
            .lock()
            .map_err(|_| CacheError::internal("mutation gate poisoned"))
    }

    fn validate_heading(&self, heading: &Heading) -> Result<(), ValidationError> {
        if self.config.headings.contains(heading.as_str()) {
            return Ok(());
        }
        Err(ValidationError::UnknownHeading {
            heading: heading.as_str().to_string(),
        })
    }

    fn validate_host(host: &str) -> Result<(), ValidationError> {
        if host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        Ok(())
    }

    /// Writes already-fetched records into `session`'s read cache.
    ///
    /// Every record is validated before anything is written; a bad one
    /// fails the whole batch with no partial state change.
    pub fn cache_records(&self, session: SessionId, records: &[Record]) -> CacheResult<usize> {
        for record in records {
            record.patient_id.validate()?;
            Self::validate_host(&record.host)?;
            self.validate_heading(&record.heading)?;
        }

        let _gate = self.gate()?;
        let handle = self.registry.touch(session);
        let cache = handle.cache(Arc::clone(&self.store));
        for record in records {
            cache.put(record)?;
        }
        Ok(records.len())
    }

    /// Reads `session`'s cached records for `(patient, heading)`, newest
    /// first by default. Source ids with no canonical copy are skipped
    /// silently.
    pub fn get_by_patient_heading(
        &self,
        session: SessionId,
        patient: &PatientId,
        heading: &Heading,
        options: QueryOptions,
    ) -> CacheResult<Vec<Record>> {
        patient.validate()?;
        self.validate_heading(heading)?;

        let handle = self.registry.touch(session);
        let cache = handle.cache(Arc::clone(&self.store));
        let mut records = Vec::new();
        for source_id in cache.get_all_for_patient_heading(patient, heading, options)? {
            if let Some(record) = cache.get(&source_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Fetches one record from the canonical cache, requiring existence.
    /// This is the strict detail path; list reads skip unknown ids
    /// instead.
    pub fn get_record(&self, source_id: &SourceId) -> CacheResult<Record> {
        self.records()
            .get(source_id)?
            .ok_or_else(|| CacheError::RecordNotFound {
                source_id: source_id.as_str().to_string(),
            })
    }

    /// Merges a batch of discovery candidates. See
    /// [`DiscoveryEngine::merge`] for the per-record semantics.
    pub fn merge_discovery_data(
        &self,
        host: &str,
        patient: &PatientId,
        heading: &Heading,
        batch: &[DiscoveryRecord],
    ) -> CacheResult<MergeOutcome> {
        patient.validate()?;
        Self::validate_host(host)?;
        if heading.as_str() != FINISHED_SENTINEL {
            self.validate_heading(heading)?;
        }

        let _gate = self.gate()?;
        self.discovery.merge(host, patient, heading, batch)
    }

    /// Reverts previous merges for `(patient, heading)` and broadcasts
    /// an invalidation for every origin host that was touched.
    pub fn revert_discovery_data(
        &self,
        patient: &PatientId,
        heading: &Heading,
    ) -> CacheResult<Vec<RevertReceipt>> {
        patient.validate()?;
        self.validate_heading(heading)?;

        let _gate = self.gate()?;
        let receipts = self.discovery.revert(patient, heading)?;

        let hosts: BTreeSet<&str> = receipts.iter().map(|r| r.host.as_str()).collect();
        for host in hosts {
            self.broadcaster.delete(host, patient, heading);
        }
        Ok(receipts)
    }

    /// Reverts every known discovery link (full environment reset) and
    /// broadcasts an invalidation for each distinct `(host, patient,
    /// heading)` that was touched.
    pub fn revert_all_discovery_data(&self) -> CacheResult<Vec<RevertReceipt>> {
        let _gate = self.gate()?;
        let receipts = self.discovery.revert_all()?;

        let mut swept = BTreeSet::new();
        for receipt in &receipts {
            let key = (
                receipt.host.clone(),
                receipt.patient_id.clone(),
                receipt.heading.clone(),
            );
            if swept.insert(key) {
                self.broadcaster
                    .delete(&receipt.host, &receipt.patient_id, &receipt.heading);
            }
        }
        Ok(receipts)
    }

    /// Marks `patient` as loading; called when an external fetch cycle
    /// begins.
    pub fn begin_loading(&self, patient: &PatientId, new_patient: bool) -> CacheResult<()> {
        patient.validate()?;
        let _gate = self.gate()?;
        self.status()
            .create(patient, &StatusRecord::loading(new_patient))?;
        Ok(())
    }

    /// The polling primitive: bumps and returns the patient's status
    /// record, or `None` if the patient has never been seen.
    pub fn status_check(&self, patient: &PatientId) -> CacheResult<Option<StatusRecord>> {
        patient.validate()?;
        let _gate = self.gate()?;
        Ok(self.status().check(patient)?)
    }
}
