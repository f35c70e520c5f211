//! Per-patient load status tracking.
//!
//! A small state machine (`loading_data -> ready`) plus a monotonic
//! request counter. Clients poll [`StatusTracker::check`] to decide
//! whether to re-fetch; the only transition to `ready` happens when the
//! discovery feed delivers its `finished` sentinel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::PatientId;
use crate::store::{DocumentStore, KeyPath, Segment, StorageError};

/// Load state of a patient's record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// The discovery feed is still delivering data for this patient.
    LoadingData,
    /// A full discovery pass has completed.
    Ready,
}

/// One status record per patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Current load state.
    pub status: LoadStatus,
    /// True if the patient had never been seen before this load.
    pub new_patient: bool,
    /// Strictly non-decreasing across successive `check` calls.
    pub request_no: i64,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// A fresh `loading_data` record.
    #[must_use]
    pub fn loading(new_patient: bool) -> Self {
        Self {
            status: LoadStatus::LoadingData,
            new_patient,
            request_no: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Tracks per-patient load status over the document store.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
}

impl StatusTracker {
    /// Creates a tracker rooted at the global `status` prefix.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            root: KeyPath::root().child("status"),
        }
    }

    fn path(&self, patient: &PatientId) -> KeyPath {
        self.root.child(Segment::parse(patient.as_str()))
    }

    /// Unconditionally writes `record` for `patient`.
    pub fn create(&self, patient: &PatientId, record: &StatusRecord) -> Result<(), StorageError> {
        let document = serde_json::to_value(record)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.store.put_document(&self.path(patient), &document)
    }

    /// Unconditional overwrite; identical to [`Self::create`], kept as a
    /// separate name to match the write paths that call it.
    pub fn update(&self, patient: &PatientId, record: &StatusRecord) -> Result<(), StorageError> {
        self.create(patient, record)
    }

    /// Returns the current status record, or `None` if the patient has
    /// never been seen.
    pub fn get(&self, patient: &PatientId) -> Result<Option<StatusRecord>, StorageError> {
        let Some(document) = self.store.get_document(&self.path(patient), false)? else {
            return Ok(None);
        };
        serde_json::from_value(document)
            .map(Some)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// The polling primitive: `None` if no status record exists yet;
    /// otherwise bumps `request_no`, persists, and returns the updated
    /// record.
    pub fn check(&self, patient: &PatientId) -> Result<Option<StatusRecord>, StorageError> {
        let Some(mut record) = self.get(patient)? else {
            return Ok(None);
        };
        record.request_no += 1;
        record.updated_at = Utc::now();
        self.update(patient, &record)?;
        Ok(Some(record))
    }

    /// Transitions `patient` to `ready`, preserving `request_no` and
    /// `new_patient`. A patient with no status record yet gets a fresh
    /// `ready` one.
    pub fn mark_ready(&self, patient: &PatientId) -> Result<StatusRecord, StorageError> {
        let mut record = self.get(patient)?.unwrap_or_else(|| StatusRecord {
            status: LoadStatus::Ready,
            new_patient: false,
            request_no: 0,
            updated_at: Utc::now(),
        });
        record.status = LoadStatus::Ready;
        record.updated_at = Utc::now();
        self.update(patient, &record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn tracker() -> StatusTracker {
        StatusTracker::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn patient() -> PatientId {
        PatientId::from(9_999_999_000_i64)
    }

    #[test]
    fn test_get_unseen_patient_is_none() {
        assert!(tracker().get(&patient()).unwrap().is_none());
    }

    #[test]
    fn test_check_unseen_patient_is_none() {
        assert!(tracker().check(&patient()).unwrap().is_none());
    }

    #[test]
    fn test_check_increments_request_no() {
        let tracker = tracker();
        tracker
            .create(&patient(), &StatusRecord::loading(true))
            .unwrap();

        let first = tracker.check(&patient()).unwrap().unwrap();
        assert_eq!(first.request_no, 1);
        assert_eq!(first.status, LoadStatus::LoadingData);
        assert!(first.new_patient);

        let second = tracker.check(&patient()).unwrap().unwrap();
        assert_eq!(second.request_no, 2);

        // Never decreases.
        let third = tracker.check(&patient()).unwrap().unwrap();
        assert!(third.request_no >= second.request_no);
    }

    #[test]
    fn test_mark_ready_preserves_counter() {
        let tracker = tracker();
        tracker
            .create(&patient(), &StatusRecord::loading(false))
            .unwrap();
        tracker.check(&patient()).unwrap();
        tracker.check(&patient()).unwrap();

        let ready = tracker.mark_ready(&patient()).unwrap();
        assert_eq!(ready.status, LoadStatus::Ready);
        assert_eq!(ready.request_no, 2);
        assert!(!ready.new_patient);

        let stored = tracker.get(&patient()).unwrap().unwrap();
        assert_eq!(stored.status, LoadStatus::Ready);
        assert_eq!(stored.request_no, 2);
    }

    #[test]
    fn test_mark_ready_without_prior_record() {
        let tracker = tracker();
        let ready = tracker.mark_ready(&patient()).unwrap();
        assert_eq!(ready.status, LoadStatus::Ready);
        assert_eq!(ready.request_no, 0);
    }

    #[test]
    fn test_update_overwrites() {
        let tracker = tracker();
        tracker
            .create(&patient(), &StatusRecord::loading(true))
            .unwrap();
        let mut record = tracker.get(&patient()).unwrap().unwrap();
        record.new_patient = false;
        tracker.update(&patient(), &record).unwrap();

        assert!(!tracker.get(&patient()).unwrap().unwrap().new_patient);
    }
}
