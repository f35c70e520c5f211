//! Bijective id mapping between the discovery feed and cached records.
//!
//! Both directions are created and destroyed together: a
//! `discovery_source_id` maps to exactly one `source_id` and vice
//! versa. The `by_source_id` side carries a denormalized copy of the
//! link's identifying fields so reverts can filter by patient and
//! heading without touching the record cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::record::{Heading, PatientId, SourceId};
use crate::store::{DocumentStore, KeyPath, Scalar, Segment, StorageError};

/// One direction-pair in the link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryLink {
    /// The externally assigned id from the discovery feed.
    pub discovery_source_id: String,
    /// The internally assigned record id.
    pub source_id: SourceId,
    /// The patient the linked record belongs to.
    pub patient_id: PatientId,
    /// The linked record's heading.
    pub heading: Heading,
    /// The origin host the record was merged under.
    pub host: String,
}

/// The link table over the document store.
#[derive(Clone)]
pub struct LinkTable {
    store: Arc<dyn DocumentStore>,
    root: KeyPath,
}

impl LinkTable {
    /// Creates a table rooted at the global `discovery_link` prefix.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            root: KeyPath::root().child("discovery_link"),
        }
    }

    fn by_discovery_path(&self, discovery_source_id: &str) -> KeyPath {
        self.root
            .child("by_discovery_id")
            .child(Segment::parse(discovery_source_id))
    }

    fn by_source_path(&self, source_id: &SourceId) -> KeyPath {
        self.root.child("by_source_id").child(source_id.as_str())
    }

    /// Creates both directions of `link` as one logical operation.
    pub fn create(&self, link: &DiscoveryLink) -> Result<(), StorageError> {
        self.store.put(
            &self.by_discovery_path(&link.discovery_source_id),
            Scalar::from(link.source_id.as_str()),
        )?;
        let document = serde_json::to_value(link)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.store
            .put_document(&self.by_source_path(&link.source_id), &document)
    }

    /// Looks up the internal id linked to `discovery_source_id`.
    pub fn source_id_for(
        &self,
        discovery_source_id: &str,
    ) -> Result<Option<SourceId>, StorageError> {
        let Some(scalar) = self.store.get(&self.by_discovery_path(discovery_source_id))? else {
            return Ok(None);
        };
        Ok(scalar.as_str().map(SourceId::new))
    }

    /// Reads the link owning `source_id`.
    pub fn get(&self, source_id: &SourceId) -> Result<Option<DiscoveryLink>, StorageError> {
        let Some(document) = self.store.get_document(&self.by_source_path(source_id), false)?
        else {
            return Ok(None);
        };
        serde_json::from_value(document)
            .map(Some)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Removes both directions of the link owning `source_id`, returning
    /// the removed link. Removing an unlinked id is a no-op.
    pub fn remove(&self, source_id: &SourceId) -> Result<Option<DiscoveryLink>, StorageError> {
        let Some(link) = self.get(source_id)? else {
            return Ok(None);
        };
        self.store.delete(&self.by_source_path(source_id))?;
        self.store
            .delete(&self.by_discovery_path(&link.discovery_source_id))?;
        Ok(Some(link))
    }

    /// Every linked source id, in segment order.
    pub fn all_source_ids(&self) -> Result<Vec<SourceId>, StorageError> {
        let children = self.store.children(&self.root.child("by_source_id"))?;
        Ok(children
            .into_iter()
            .map(|segment| SourceId::new(segment.to_string()))
            .collect())
    }
}
