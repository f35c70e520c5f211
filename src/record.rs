//! Record types and identity management.
//!
//! A [`Record`] is one cached clinical heading instance. Its
//! [`SourceId`] is the internally assigned identity everything else
//! points at: the secondary indices store source ids, never copies.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// The internally assigned, globally unique identifier of a cached
/// [`Record`]. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a source id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Formats the id a freshly allocated record receives:
    /// the origin host plus the allocated record number.
    #[must_use]
    pub fn allocated(host: &str, record_no: i64) -> Self {
        Self(format!("{host}-{record_no}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies the patient a record belongs to.
///
/// Patient ids arrive as either numbers (NHS numbers) or strings; both
/// normalize to the same textual identity, and serialization emits a
/// number again whenever the id is numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatientId(String);

impl PatientId {
    /// Creates a patient id from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns an error if the id is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.trim().is_empty() {
            return Err(ValidationError::EmptyPatientId);
        }
        Ok(())
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PatientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PatientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for PatientId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for PatientId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for PatientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Only canonical numerals go out as numbers; "007" stays text.
        if let Ok(n) = self.0.parse::<i64>() {
            if n.to_string() == self.0 {
                return serializer.serialize_i64(n);
            }
        }
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PatientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// A clinical heading name (e.g. `procedures`, `vaccinations`).
///
/// Membership in the configured heading set is checked at the engine
/// boundary, before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Heading(String);

impl Heading {
    /// Creates a heading from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The heading name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Heading {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Heading {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// One cached clinical heading instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Internally assigned identity, immutable once created.
    pub source_id: SourceId,
    /// The patient this record belongs to.
    pub patient_id: PatientId,
    /// Clinical category.
    pub heading: Heading,
    /// Origin record system.
    pub host: String,
    /// Epoch-millisecond timestamp; the secondary sort/lookup key.
    pub date: i64,
    /// Monotonically increasing per source id, dense from 1.
    pub version: u32,
    /// The clinical content. Opaque to the core.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    /// Starts building a record.
    #[must_use]
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// The record's date as a UTC timestamp.
    #[must_use]
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.date).single()
    }

    /// Serializes the record for document storage.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Deserializes a record read back from document storage.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Builder for [`Record`].
///
/// # Example
/// ```
/// use clinicache::record::Record;
///
/// let record = Record::builder()
///     .source_id("ethercis-1")
///     .patient_id(9_999_999_000_i64)
///     .heading("procedures")
///     .host("ethercis")
///     .date(1_700_000_000_000)
///     .build()
///     .unwrap();
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    source_id: Option<SourceId>,
    patient_id: Option<PatientId>,
    heading: Option<Heading>,
    host: Option<String>,
    date: Option<i64>,
    version: Option<u32>,
    payload: Option<serde_json::Value>,
}

impl RecordBuilder {
    /// Set the source id (required).
    #[must_use]
    pub fn source_id(mut self, id: impl Into<SourceId>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Set the patient id (required).
    #[must_use]
    pub fn patient_id(mut self, id: impl Into<PatientId>) -> Self {
        self.patient_id = Some(id.into());
        self
    }

    /// Set the heading (required).
    #[must_use]
    pub fn heading(mut self, heading: impl Into<Heading>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    /// Set the origin host (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the record date in epoch milliseconds (defaults to now).
    #[must_use]
    pub const fn date(mut self, date: i64) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the version (defaults to 1).
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the clinical payload (defaults to null).
    #[must_use]
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Build the record.
    ///
    /// Returns `ValidationError::MissingField` for an unset required
    /// field, `EmptyPatientId`/`EmptyHost` for blank identities.
    pub fn build(self) -> Result<Record, ValidationError> {
        let source_id = self.source_id.ok_or_else(|| ValidationError::MissingField {
            field: "source_id".to_string(),
        })?;

        let patient_id = self.patient_id.ok_or_else(|| ValidationError::MissingField {
            field: "patient_id".to_string(),
        })?;
        patient_id.validate()?;

        let heading = self.heading.ok_or_else(|| ValidationError::MissingField {
            field: "heading".to_string(),
        })?;

        let host = self.host.ok_or_else(|| ValidationError::MissingField {
            field: "host".to_string(),
        })?;
        if host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }

        Ok(Record {
            source_id,
            patient_id,
            heading,
            host,
            date: self.date.unwrap_or_else(|| Utc::now().timestamp_millis()),
            version: self.version.unwrap_or(1),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_builder() -> RecordBuilder {
        Record::builder()
            .source_id("ethercis-1")
            .patient_id(9_999_999_000_i64)
            .heading("procedures")
            .host("ethercis")
            .date(1_700_000_000_000)
    }

    #[test]
    fn test_valid_build_defaults() {
        let record = valid_builder().build().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.payload, serde_json::Value::Null);
        assert_eq!(record.patient_id.as_str(), "9999999000");
    }

    #[test]
    fn test_missing_source_id() {
        let result = Record::builder()
            .patient_id("p1")
            .heading("procedures")
            .host("ethercis")
            .build();
        match result.unwrap_err() {
            ValidationError::MissingField { field } => assert_eq!(field, "source_id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_patient_rejected() {
        let result = valid_builder().patient_id("  ").build();
        assert!(matches!(result, Err(ValidationError::EmptyPatientId)));
    }

    #[test]
    fn test_empty_host_rejected() {
        let result = valid_builder().host("").build();
        assert!(matches!(result, Err(ValidationError::EmptyHost)));
    }

    #[test]
    fn test_patient_id_serde_keeps_numeric_form() {
        let numeric: PatientId = serde_json::from_value(json!(9_999_999_000_i64)).unwrap();
        assert_eq!(numeric.as_str(), "9999999000");
        assert_eq!(serde_json::to_value(&numeric).unwrap(), json!(9_999_999_000_i64));

        let textual: PatientId = serde_json::from_value(json!("p-17")).unwrap();
        assert_eq!(serde_json::to_value(&textual).unwrap(), json!("p-17"));
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = valid_builder()
            .payload(json!({"name": "appendectomy"}))
            .build()
            .unwrap();
        let back = Record::from_json(record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_allocated_source_id_format() {
        let sid = SourceId::allocated("ethercis", 42);
        assert_eq!(sid.as_str(), "ethercis-42");
    }

    #[test]
    fn test_date_time_helper() {
        let record = valid_builder().build().unwrap();
        let ts = record.date_time().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }
}
