//! Abstract storage trait for the keyed document store.
//!
//! The whole subsystem is built on this one primitive: a tree of nodes
//! addressed by key paths, with scalar leaves. By using a trait, the
//! cache layers work the same over the in-memory backend, a durable
//! embedded engine, or a relational table keyed by a serialized path.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::path::{KeyPath, Segment};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error (poisoned lock, I/O, corruption).
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A counter leaf held a non-integer value.
    #[error("Counter at {path} is not an integer")]
    NotACounter {
        /// The offending path.
        path: String,
    },
}

/// A scalar value held at a leaf of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absent-but-materialized value.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Floating-point leaf.
    Float(f64),
    /// Textual leaf.
    String(String),
}

impl Scalar {
    /// Returns the integer value, if this is an integer leaf.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string value, if this is a textual leaf.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a JSON leaf value into a scalar.
    ///
    /// Objects and arrays are not leaves; callers decompose them into
    /// subtrees before reaching this point.
    #[must_use]
    pub fn from_json_leaf(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Converts this scalar into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::Number((*n).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Storage trait for the hierarchical keyed document store.
///
/// Reads of a non-existent path return `Ok(None)` / `Ok(false)`, never an
/// error. Implementations must serialize mutations so multi-step callers
/// observe a consistent tree (see the crate docs on the ordering
/// discipline the cache layers rely on).
pub trait DocumentStore: Send + Sync {
    /// True if a node (leaf or interior) exists at `path`.
    fn exists(&self, path: &KeyPath) -> Result<bool, StorageError>;

    /// Gets the scalar leaf at `path`, or `None` if absent or interior.
    fn get(&self, path: &KeyPath) -> Result<Option<Scalar>, StorageError>;

    /// Materializes the subtree at `path` as a JSON document.
    ///
    /// With `preserve_arrays == false`, any node whose children are
    /// exactly the consecutive integers `0..n-1` collapses into a JSON
    /// array; with `true` the result is always an object keyed by
    /// segment. A scalar leaf materializes as its JSON value.
    fn get_document(
        &self,
        path: &KeyPath,
        preserve_arrays: bool,
    ) -> Result<Option<serde_json::Value>, StorageError>;

    /// Writes a scalar leaf at `path`, replacing any existing subtree.
    fn put(&self, path: &KeyPath, value: Scalar) -> Result<(), StorageError>;

    /// Decomposes `document` into leaves under `path`, replacing any
    /// existing subtree there.
    fn put_document(
        &self,
        path: &KeyPath,
        document: &serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Deletes the node at `path` and everything below it. Deleting an
    /// absent path is a no-op.
    fn delete(&self, path: &KeyPath) -> Result<(), StorageError>;

    /// Atomically increments the integer leaf at `path` (absent counts
    /// as zero) and returns the post-increment value. This is the sole
    /// allocator of integer ids in the subsystem.
    fn increment(&self, path: &KeyPath) -> Result<i64, StorageError>;

    /// Lists the immediate child segments of `path` in ascending segment
    /// order. Absent or leaf nodes yield an empty list. This is the
    /// traversal primitive index walks are built on; descending walks
    /// iterate the result in reverse.
    fn children(&self, path: &KeyPath) -> Result<Vec<Segment>, StorageError>;
}
