//! Discovery reconciliation engine.
//!
//! The discovery feed delivers candidate records under its own ids.
//! Merging absorbs the ones not seen before: each gets a freshly
//! allocated source id, a version-1 record in the canonical cache, and
//! a bidirectional link. Reverting undoes a previous merge, removing
//! the record and its link together.
//!
//! Per record the lifecycle is `unknown -> linked -> (reverted ->
//! unknown)`; a record whose link was already removed by a concurrent
//! revert is silently skipped, never an error.

mod links;

pub use links::{DiscoveryLink, LinkTable};

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broadcast::InvalidationBroadcaster;
use crate::cache::RecordCache;
use crate::error::{CacheResult, ValidationError};
use crate::path;
use crate::record::{Heading, PatientId, Record, SourceId};
use crate::status::StatusTracker;
use crate::store::DocumentStore;

/// Sentinel heading signalling the discovery feed has completed a full
/// pass for a patient. Never a clinical heading.
pub const FINISHED_SENTINEL: &str = "finished";

/// One candidate record from the discovery feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// The feed's own id for this clinical fact.
    #[serde(alias = "sourceId")]
    pub discovery_source_id: String,
    /// Epoch-millisecond timestamp, if the feed supplied one.
    #[serde(default)]
    pub date: Option<i64>,
    /// The clinical content. Opaque to the core.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DiscoveryRecord {
    /// Creates a candidate carrying only the feed's id.
    pub fn new(discovery_source_id: impl Into<String>) -> Self {
        Self {
            discovery_source_id: discovery_source_id.into(),
            date: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the record date.
    #[must_use]
    pub const fn with_date(mut self, date: i64) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the clinical payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of a merge batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// True when the caller should emit a client-visible refresh signal.
    /// Only the `finished` sentinel sets this; for ordinary batches the
    /// invalidation broadcast is what forces re-fetches.
    pub refresh: bool,
    /// Number of records newly absorbed by this batch.
    pub merged: usize,
}

impl MergeOutcome {
    const fn no_refresh(merged: usize) -> Self {
        Self {
            refresh: false,
            merged,
        }
    }
}

/// Descriptor for one reverted record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevertReceipt {
    /// True if a cached record was actually removed.
    pub deleted: bool,
    /// The patient the record belonged to.
    pub patient_id: PatientId,
    /// The record's heading.
    pub heading: Heading,
    /// The removed record's source id.
    pub source_id: SourceId,
    /// The origin host the record was merged under.
    pub host: String,
}

/// Reconciles the discovery feed against the canonical record cache.
#[derive(Clone)]
pub struct DiscoveryEngine {
    store: Arc<dyn DocumentStore>,
    records: RecordCache,
    links: LinkTable,
    status: StatusTracker,
    broadcaster: Arc<InvalidationBroadcaster>,
}

impl DiscoveryEngine {
    /// Creates an engine over the canonical record cache.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        records: RecordCache,
        broadcaster: Arc<InvalidationBroadcaster>,
    ) -> Self {
        let links = LinkTable::new(Arc::clone(&store));
        let status = StatusTracker::new(Arc::clone(&store));
        Self {
            store,
            records,
            links,
            status,
            broadcaster,
        }
    }

    /// The canonical record cache this engine merges into.
    #[must_use]
    pub fn records(&self) -> &RecordCache {
        &self.records
    }

    /// The link table.
    #[must_use]
    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// The status tracker.
    #[must_use]
    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    /// Absorbs a batch of discovery candidates for `(host, patient,
    /// heading)`.
    ///
    /// Already-linked candidates are skipped, so replaying a batch is
    /// idempotent. If anything was newly merged, one invalidation
    /// broadcast goes out for the whole batch. The `finished` sentinel
    /// transitions the patient's status to `ready` without touching any
    /// record.
    pub fn merge(
        &self,
        host: &str,
        patient: &PatientId,
        heading: &Heading,
        batch: &[DiscoveryRecord],
    ) -> CacheResult<MergeOutcome> {
        if batch.is_empty() && heading.as_str() != FINISHED_SENTINEL {
            return Ok(MergeOutcome::no_refresh(0));
        }

        if heading.as_str() == FINISHED_SENTINEL {
            self.status.mark_ready(patient)?;
            debug!(patient = %patient, "discovery feed finished; patient ready");
            return Ok(MergeOutcome {
                refresh: true,
                merged: 0,
            });
        }

        // Validate the whole batch before any mutation.
        for candidate in batch {
            if candidate.discovery_source_id.trim().is_empty() {
                return Err(ValidationError::EmptyDiscoverySourceId.into());
            }
        }

        let mut merged = 0_usize;
        for candidate in batch {
            if self
                .links
                .source_id_for(&candidate.discovery_source_id)?
                .is_some()
            {
                continue;
            }

            let record_no = self.store.increment(&path!["counters", "record_id"])?;
            let source_id = SourceId::allocated(host, record_no);
            let record = Record {
                source_id: source_id.clone(),
                patient_id: patient.clone(),
                heading: heading.clone(),
                host: host.to_string(),
                date: candidate
                    .date
                    .unwrap_or_else(|| Utc::now().timestamp_millis()),
                version: 1,
                payload: candidate.payload.clone(),
            };
            self.records.put(&record)?;
            self.links.create(&DiscoveryLink {
                discovery_source_id: candidate.discovery_source_id.clone(),
                source_id,
                patient_id: patient.clone(),
                heading: heading.clone(),
                host: host.to_string(),
            })?;
            merged += 1;
        }

        if merged > 0 {
            debug!(
                host,
                patient = %patient,
                heading = %heading,
                merged,
                "merged discovery records"
            );
            self.broadcaster.delete(host, patient, heading);
        }

        Ok(MergeOutcome::no_refresh(merged))
    }

    /// Undoes previous merges for `(patient, heading)`: each matching
    /// record is deleted from the canonical cache and its link removed
    /// in both directions. Receipts come back in the order the matching
    /// source ids were found.
    pub fn revert(
        &self,
        patient: &PatientId,
        heading: &Heading,
    ) -> CacheResult<Vec<RevertReceipt>> {
        self.revert_matching(Some((patient, heading)))
    }

    /// Reverts every known link regardless of patient or heading. Used
    /// for full environment reset.
    pub fn revert_all(&self) -> CacheResult<Vec<RevertReceipt>> {
        self.revert_matching(None)
    }

    fn revert_matching(
        &self,
        filter: Option<(&PatientId, &Heading)>,
    ) -> CacheResult<Vec<RevertReceipt>> {
        let mut receipts = Vec::new();
        for source_id in self.links.all_source_ids()? {
            // A link already removed by a concurrent revert is a no-op
            // for this batch.
            let Some(link) = self.links.get(&source_id)? else {
                continue;
            };
            if let Some((patient, heading)) = filter {
                if link.patient_id != *patient || link.heading != *heading {
                    continue;
                }
            }

            let deleted = self.records.delete_by_source_id(&source_id)?.is_some();
            self.links.remove(&source_id)?;
            receipts.push(RevertReceipt {
                deleted,
                patient_id: link.patient_id,
                heading: link.heading,
                source_id,
                host: link.host,
            });
        }

        if !receipts.is_empty() {
            debug!(reverted = receipts.len(), "reverted discovery records");
        }
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::session::InMemorySessionRegistry;
    use crate::store::InMemoryDocumentStore;

    fn engine() -> DiscoveryEngine {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let broadcaster = Arc::new(InvalidationBroadcaster::new(
            Arc::clone(&store),
            registry,
            Arc::new(EventBus::new()),
        ));
        let records = RecordCache::new(Arc::clone(&store), crate::store::KeyPath::root());
        DiscoveryEngine::new(store, records, broadcaster)
    }

    fn patient() -> PatientId {
        PatientId::from(9_999_999_000_i64)
    }

    #[test]
    fn test_empty_batch_needs_no_refresh() {
        let engine = engine();
        let outcome = engine
            .merge("ethercis", &patient(), &Heading::from("procedures"), &[])
            .unwrap();
        assert!(!outcome.refresh);
        assert_eq!(outcome.merged, 0);
        assert!(engine.links.all_source_ids().unwrap().is_empty());
    }

    #[test]
    fn test_merge_creates_record_and_link() {
        let engine = engine();
        let heading = Heading::from("procedures");
        let batch = vec![DiscoveryRecord::new("d1").with_date(1_700_000_000_000)];

        let outcome = engine.merge("ethercis", &patient(), &heading, &batch).unwrap();
        assert!(!outcome.refresh);
        assert_eq!(outcome.merged, 1);

        let sid = engine.links.source_id_for("d1").unwrap().unwrap();
        let record = engine.records.get(&sid).unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.heading, heading);
        assert_eq!(record.host, "ethercis");
        assert_eq!(record.date, 1_700_000_000_000);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let engine = engine();
        let heading = Heading::from("procedures");
        let batch = vec![DiscoveryRecord::new("d1")];

        let first = engine.merge("ethercis", &patient(), &heading, &batch).unwrap();
        let second = engine.merge("ethercis", &patient(), &heading, &batch).unwrap();
        assert_eq!(first.merged, 1);
        assert_eq!(second.merged, 0);

        // Exactly one record and one link exist.
        assert_eq!(engine.links.all_source_ids().unwrap().len(), 1);
        let sid = engine.links.source_id_for("d1").unwrap().unwrap();
        assert!(engine.records.get(&sid).unwrap().is_some());
    }

    #[test]
    fn test_merge_rejects_blank_discovery_id_before_mutation() {
        let engine = engine();
        let heading = Heading::from("procedures");
        let batch = vec![DiscoveryRecord::new("d1"), DiscoveryRecord::new("  ")];

        let err = engine
            .merge("ethercis", &patient(), &heading, &batch)
            .unwrap_err();
        assert!(err.is_validation());
        // Nothing was written, including the valid candidate.
        assert!(engine.links.all_source_ids().unwrap().is_empty());
    }

    #[test]
    fn test_finished_sentinel_marks_ready() {
        let engine = engine();
        engine
            .status
            .create(&patient(), &crate::status::StatusRecord::loading(true))
            .unwrap();
        engine.status.check(&patient()).unwrap();
        engine.status.check(&patient()).unwrap();

        let outcome = engine
            .merge("ethercis", &patient(), &Heading::from(FINISHED_SENTINEL), &[])
            .unwrap();
        assert!(outcome.refresh);
        assert_eq!(outcome.merged, 0);

        let status = engine.status.get(&patient()).unwrap().unwrap();
        assert_eq!(status.status, crate::status::LoadStatus::Ready);
        assert_eq!(status.request_no, 2);
    }

    #[test]
    fn test_revert_removes_record_and_link() {
        let engine = engine();
        let heading = Heading::from("vaccinations");
        engine
            .merge("ethercis", &patient(), &heading, &[DiscoveryRecord::new("d1")])
            .unwrap();
        let sid = engine.links.source_id_for("d1").unwrap().unwrap();

        let receipts = engine.revert(&patient(), &heading).unwrap();
        assert_eq!(receipts.len(), 1);
        let receipt = &receipts[0];
        assert!(receipt.deleted);
        assert_eq!(receipt.patient_id, patient());
        assert_eq!(receipt.heading, heading);
        assert_eq!(receipt.source_id, sid);
        assert_eq!(receipt.host, "ethercis");

        assert!(engine.records.get(&sid).unwrap().is_none());
        assert!(engine.links.source_id_for("d1").unwrap().is_none());
        assert!(engine.links.get(&sid).unwrap().is_none());
    }

    #[test]
    fn test_revert_filters_by_patient_and_heading() {
        let engine = engine();
        let vaccinations = Heading::from("vaccinations");
        let procedures = Heading::from("procedures");
        engine
            .merge("ethercis", &patient(), &vaccinations, &[DiscoveryRecord::new("d1")])
            .unwrap();
        engine
            .merge("ethercis", &patient(), &procedures, &[DiscoveryRecord::new("d2")])
            .unwrap();

        let receipts = engine.revert(&patient(), &vaccinations).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].heading, vaccinations);

        // The other heading's link survives.
        assert!(engine.links.source_id_for("d2").unwrap().is_some());
    }

    #[test]
    fn test_revert_all_clears_everything() {
        let engine = engine();
        engine
            .merge(
                "ethercis",
                &patient(),
                &Heading::from("vaccinations"),
                &[DiscoveryRecord::new("d1"), DiscoveryRecord::new("d2")],
            )
            .unwrap();
        engine
            .merge(
                "ethercis",
                &PatientId::from(9_999_999_111_i64),
                &Heading::from("procedures"),
                &[DiscoveryRecord::new("d3")],
            )
            .unwrap();

        let receipts = engine.revert_all().unwrap();
        assert_eq!(receipts.len(), 3);
        assert!(receipts.iter().all(|r| r.deleted));
        assert!(engine.links.all_source_ids().unwrap().is_empty());
    }

    #[test]
    fn test_revert_with_no_matches_is_empty() {
        let engine = engine();
        let receipts = engine
            .revert(&patient(), &Heading::from("vaccinations"))
            .unwrap();
        assert!(receipts.is_empty());
    }
}
