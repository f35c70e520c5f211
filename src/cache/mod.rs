//! Multi-index record cache.
//!
//! One canonical copy of each record lives under `by_source_id`; every
//! secondary index stores only pointers (the source id), never copies.
//! A [`RecordCache`] is rooted at a key-path prefix, so the same type
//! serves both the canonical record store and each session partition's
//! read cache.
//!
//! Mutations follow a fixed ordering discipline in place of multi-key
//! transactions: the canonical copy is written before any pointer, and
//! on delete the canonical record is read (for its `date`) before
//! anything is removed. Callers running on a preemptive runtime must
//! not interleave two mutations for the same patient and heading; the
//! engine serializes them behind its mutation gate.

use std::sync::Arc;

use tracing::debug;

use crate::record::{Heading, PatientId, Record, SourceId};
use crate::store::{DocumentStore, KeyPath, Scalar, Segment, StorageError};

/// Traversal direction for the by-date index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Oldest first.
    Forward,
    /// Newest first (the default read order for headings).
    #[default]
    Reverse,
}

/// Options for the paginated by-date read path.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Traversal order, newest first by default.
    pub direction: Direction,
    /// Maximum number of source ids to yield; 0 means unbounded.
    pub limit: usize,
}

impl QueryOptions {
    /// Newest-first, unbounded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the traversal direction.
    #[must_use]
    pub const fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Caps the number of yielded source ids (0 = unbounded).
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

fn patient_segment(patient: &PatientId) -> Segment {
    Segment::parse(patient.as_str())
}

/// Pointer index keyed by heading alone.
#[derive(Clone)]
pub struct ByHeadingIndex {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
}

impl ByHeadingIndex {
    fn new(store: Arc<dyn DocumentStore>, cache_root: &KeyPath) -> Self {
        Self {
            store,
            root: cache_root.child("by_heading"),
        }
    }

    fn entry(&self, heading: &Heading, source_id: &SourceId) -> KeyPath {
        self.root.child(heading.as_str()).child(source_id.as_str())
    }

    fn add(&self, heading: &Heading, source_id: &SourceId) -> Result<(), StorageError> {
        self.store.put(&self.entry(heading, source_id), Scalar::Bool(true))
    }

    fn remove(&self, heading: &Heading, source_id: &SourceId) -> Result<(), StorageError> {
        self.store.delete(&self.entry(heading, source_id))
    }

    /// Drops the entire subtree for `heading`.
    pub fn delete_all(&self, heading: &Heading) -> Result<(), StorageError> {
        self.store.delete(&self.root.child(heading.as_str()))
    }

    /// True if the index points at `source_id` under `heading`.
    pub fn contains(&self, heading: &Heading, source_id: &SourceId) -> Result<bool, StorageError> {
        self.store.exists(&self.entry(heading, source_id))
    }

    /// All source ids indexed under `heading`, in segment order.
    pub fn source_ids(&self, heading: &Heading) -> Result<Vec<SourceId>, StorageError> {
        let children = self.store.children(&self.root.child(heading.as_str()))?;
        Ok(children
            .into_iter()
            .map(|segment| SourceId::new(segment.to_string()))
            .collect())
    }
}

/// Chronological pointer index under `by_patient[..][..]["by_date"]`.
///
/// Dates are integer segments, so the index is chronological by
/// construction; "reverse" is a traversal option, not a re-sort, and
/// equal-date ties keep the bucket's segment order.
#[derive(Clone)]
pub struct ByDateIndex {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
}

impl ByDateIndex {
    fn new(store: Arc<dyn DocumentStore>, cache_root: &KeyPath) -> Self {
        Self {
            store,
            root: cache_root.child("by_patient"),
        }
    }

    fn bucket_root(&self, patient: &PatientId, heading: &Heading) -> KeyPath {
        self.root
            .child(patient_segment(patient))
            .child(heading.as_str())
            .child("by_date")
    }

    fn entry(
        &self,
        patient: &PatientId,
        heading: &Heading,
        date: i64,
        source_id: &SourceId,
    ) -> KeyPath {
        self.bucket_root(patient, heading)
            .child(date)
            .child(source_id.as_str())
    }

    fn add(
        &self,
        patient: &PatientId,
        heading: &Heading,
        date: i64,
        source_id: &SourceId,
    ) -> Result<(), StorageError> {
        self.store
            .put(&self.entry(patient, heading, date, source_id), Scalar::Bool(true))
    }

    fn remove(
        &self,
        patient: &PatientId,
        heading: &Heading,
        date: i64,
        source_id: &SourceId,
    ) -> Result<(), StorageError> {
        self.store.delete(&self.entry(patient, heading, date, source_id))
    }

    /// True if the index points at `source_id` under the given date.
    pub fn contains(
        &self,
        patient: &PatientId,
        heading: &Heading,
        date: i64,
        source_id: &SourceId,
    ) -> Result<bool, StorageError> {
        self.store
            .exists(&self.entry(patient, heading, date, source_id))
    }

    /// Walks the date buckets in the requested order, yielding up to
    /// `limit` source ids (0 = unbounded).
    pub fn walk(
        &self,
        patient: &PatientId,
        heading: &Heading,
        options: QueryOptions,
    ) -> Result<Vec<SourceId>, StorageError> {
        let bucket_root = self.bucket_root(patient, heading);
        let mut dates = self.store.children(&bucket_root)?;
        if options.direction == Direction::Reverse {
            dates.reverse();
        }

        let mut source_ids = Vec::new();
        'dates: for date in dates {
            let mut entries = self.store.children(&bucket_root.child(date))?;
            if options.direction == Direction::Reverse {
                entries.reverse();
            }
            for entry in entries {
                source_ids.push(SourceId::new(entry.to_string()));
                if options.limit != 0 && source_ids.len() == options.limit {
                    break 'dates;
                }
            }
        }
        Ok(source_ids)
    }
}

/// Origin-host pointer index under `by_patient[..][..]["by_host"]`.
#[derive(Clone)]
pub struct ByHostIndex {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
}

impl ByHostIndex {
    fn new(store: Arc<dyn DocumentStore>, cache_root: &KeyPath) -> Self {
        Self {
            store,
            root: cache_root.child("by_patient"),
        }
    }

    fn host_root(&self, patient: &PatientId, heading: &Heading, host: &str) -> KeyPath {
        self.root
            .child(patient_segment(patient))
            .child(heading.as_str())
            .child("by_host")
            .child(host)
    }

    fn entry(
        &self,
        patient: &PatientId,
        heading: &Heading,
        host: &str,
        source_id: &SourceId,
    ) -> KeyPath {
        self.host_root(patient, heading, host).child(source_id.as_str())
    }

    fn add(
        &self,
        patient: &PatientId,
        heading: &Heading,
        host: &str,
        source_id: &SourceId,
    ) -> Result<(), StorageError> {
        self.store
            .put(&self.entry(patient, heading, host, source_id), Scalar::Bool(true))
    }

    fn remove(
        &self,
        patient: &PatientId,
        heading: &Heading,
        host: &str,
        source_id: &SourceId,
    ) -> Result<(), StorageError> {
        self.store
            .delete(&self.entry(patient, heading, host, source_id))
    }

    /// True if the index points at `source_id` under the given host.
    pub fn contains(
        &self,
        patient: &PatientId,
        heading: &Heading,
        host: &str,
        source_id: &SourceId,
    ) -> Result<bool, StorageError> {
        self.store
            .exists(&self.entry(patient, heading, host, source_id))
    }

    /// All source ids cached for `(patient, heading)` from `host`.
    pub fn source_ids(
        &self,
        patient: &PatientId,
        heading: &Heading,
        host: &str,
    ) -> Result<Vec<SourceId>, StorageError> {
        let children = self.store.children(&self.host_root(patient, heading, host))?;
        Ok(children
            .into_iter()
            .map(|segment| SourceId::new(segment.to_string()))
            .collect())
    }
}

/// Multi-index record cache rooted at a key-path prefix.
#[derive(Clone)]
pub struct RecordCache {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
    by_heading: ByHeadingIndex,
    by_date: ByDateIndex,
    by_host: ByHostIndex,
}

impl RecordCache {
    /// Creates a cache over `store`, rooted at `root`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, root: KeyPath) -> Self {
        let by_heading = ByHeadingIndex::new(Arc::clone(&store), &root);
        let by_date = ByDateIndex::new(Arc::clone(&store), &root);
        let by_host = ByHostIndex::new(Arc::clone(&store), &root);
        Self {
            store,
            root,
            by_heading,
            by_date,
            by_host,
        }
    }

    /// The cache's root prefix.
    #[must_use]
    pub fn root(&self) -> &KeyPath {
        &self.root
    }

    /// The heading-keyed pointer index.
    #[must_use]
    pub fn by_heading(&self) -> &ByHeadingIndex {
        &self.by_heading
    }

    /// The chronological pointer index.
    #[must_use]
    pub fn by_date(&self) -> &ByDateIndex {
        &self.by_date
    }

    /// The origin-host pointer index.
    #[must_use]
    pub fn by_host(&self) -> &ByHostIndex {
        &self.by_host
    }

    fn canonical_path(&self, source_id: &SourceId) -> KeyPath {
        self.root.child("by_source_id").child(source_id.as_str())
    }

    /// Caches `record`: canonical copy first, then the pointer indices.
    ///
    /// Idempotent create: an existing canonical copy for the same source
    /// id is left untouched so ids are never duplicated; the pointer
    /// entries are still ensured.
    pub fn put(&self, record: &Record) -> Result<(), StorageError> {
        let canonical = self.canonical_path(&record.source_id);
        if self.store.exists(&canonical)? {
            debug!(source_id = %record.source_id, "canonical copy already cached");
        } else {
            let document = record
                .to_json()
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            self.store.put_document(&canonical, &document)?;
        }

        self.by_heading.add(&record.heading, &record.source_id)?;
        self.by_date.add(
            &record.patient_id,
            &record.heading,
            record.date,
            &record.source_id,
        )?;
        self.by_host.add(
            &record.patient_id,
            &record.heading,
            &record.host,
            &record.source_id,
        )?;
        Ok(())
    }

    /// Reads the canonical copy for `source_id`.
    pub fn get(&self, source_id: &SourceId) -> Result<Option<Record>, StorageError> {
        let Some(document) = self
            .store
            .get_document(&self.canonical_path(source_id), false)?
        else {
            return Ok(None);
        };
        Record::from_json(document)
            .map(Some)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Walks the by-date index for `(patient, heading)` in the requested
    /// order (newest first by default), yielding up to `options.limit`
    /// source ids. The only paginated read path.
    pub fn get_all_for_patient_heading(
        &self,
        patient: &PatientId,
        heading: &Heading,
        options: QueryOptions,
    ) -> Result<Vec<SourceId>, StorageError> {
        self.by_date.walk(patient, heading, options)
    }

    /// Deletes every record cached for `(patient, heading)` from `host`,
    /// as one logical unit per record: canonical copy read first (its
    /// `date` locates the by-date pointer), then canonical delete, then
    /// pointer deletes. Returns the source ids that were removed.
    pub fn delete_all(
        &self,
        host: &str,
        patient: &PatientId,
        heading: &Heading,
    ) -> Result<Vec<SourceId>, StorageError> {
        let source_ids = self.by_host.source_ids(patient, heading, host)?;
        for source_id in &source_ids {
            // Read before delete: the date is gone once the canonical
            // copy is.
            let record = self.get(source_id)?;
            self.store.delete(&self.canonical_path(source_id))?;
            if let Some(record) = record {
                self.by_date.remove(patient, heading, record.date, source_id)?;
            }
            self.by_host.remove(patient, heading, host, source_id)?;
            self.by_heading.remove(heading, source_id)?;
        }
        if !source_ids.is_empty() {
            debug!(
                host,
                patient = %patient,
                heading = %heading,
                removed = source_ids.len(),
                "deleted cached heading records"
            );
        }
        Ok(source_ids)
    }

    /// Deletes one record by source id, removing the canonical copy and
    /// every pointer that references it. Returns the record that was
    /// removed, or `None` if the id was not cached.
    pub fn delete_by_source_id(
        &self,
        source_id: &SourceId,
    ) -> Result<Option<Record>, StorageError> {
        let Some(record) = self.get(source_id)? else {
            return Ok(None);
        };
        self.store.delete(&self.canonical_path(source_id))?;
        self.by_date
            .remove(&record.patient_id, &record.heading, record.date, source_id)?;
        self.by_host
            .remove(&record.patient_id, &record.heading, &record.host, source_id)?;
        self.by_heading.remove(&record.heading, source_id)?;
        Ok(Some(record))
    }

    /// Drops the whole by-heading subtree for `heading`. Coarse
    /// invalidation: callers use it when the member records' identities
    /// are already being dropped elsewhere.
    pub fn delete_heading(&self, heading: &Heading) -> Result<(), StorageError> {
        self.by_heading.delete_all(heading)
    }
}
