//! Error types for clinicache.
//!
//! All errors are strongly typed using thiserror. Validation errors are
//! raised before any mutation, so a failed call leaves no partial state.
//! Lookups of absent data return `Ok(None)` or empty collections rather
//! than an error, except where a caller explicitly requires existence.

use thiserror::Error;

use crate::store::StorageError;

/// Validation errors raised during input validation, before any mutation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Patient id cannot be empty")]
    EmptyPatientId,

    #[error("Host cannot be empty")]
    EmptyHost,

    #[error("Discovery source id cannot be empty")]
    EmptyDiscoverySourceId,

    #[error("Unknown heading: {heading}")]
    UnknownHeading {
        heading: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },
}

/// Top-level error type for clinicache.
///
/// This enum encompasses all possible errors that can occur when using
/// the cache core.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Record not found: {source_id}")]
    RecordNotFound {
        source_id: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CacheError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }
}

/// Result type alias for clinicache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_unknown_heading() {
        let err = ValidationError::UnknownHeading {
            heading: "horoscopes".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("horoscopes"));
        assert!(msg.contains("Unknown heading"));
    }

    #[test]
    fn test_validation_error_missing_field() {
        let err = ValidationError::MissingField {
            field: "date".to_string(),
        };
        assert!(format!("{err}").contains("date"));
    }

    #[test]
    fn test_cache_error_from_validation() {
        let err: CacheError = ValidationError::EmptyPatientId.into();
        assert!(err.is_validation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_cache_error_from_storage() {
        let err: CacheError = StorageError::BackendError("boom".to_string()).into();
        assert!(err.is_storage());
        assert!(format!("{err}").contains("boom"));
    }

    #[test]
    fn test_cache_error_not_found() {
        let err = CacheError::RecordNotFound {
            source_id: "ethercis-17".to_string(),
        };
        assert!(err.is_not_found());
        assert!(format!("{err}").contains("ethercis-17"));
    }

    #[test]
    fn test_cache_error_internal() {
        let err = CacheError::internal("unexpected state");
        assert!(format!("{err}").contains("unexpected state"));
    }
}
