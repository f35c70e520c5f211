//! JSON snapshot persistence for the in-memory store.
//!
//! The store is assumed durable by the layers above it; this module is
//! the minimal way to get there in embedded deployments: write the whole
//! tree as one JSON document with a CRC32 integrity line, load it back
//! on startup. Hosts with real durability requirements supply their own
//! [`DocumentStore`](super::DocumentStore) backend instead.

use std::fs;
use std::io::Write;
use std::path::Path;

use super::memory::{InMemoryDocumentStore, Node};
use super::traits::{DocumentStore, StorageError};
use crate::store::KeyPath;

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("snapshot {context}: {err}"))
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

impl InMemoryDocumentStore {
    /// Writes the whole tree to `path` as a checksummed JSON snapshot.
    ///
    /// The write goes through a sibling temp file and an atomic rename,
    /// so a crash mid-write leaves the previous snapshot intact.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StorageError> {
        // Segment identity survives the textual form: numeric keys
        // re-normalize to integer segments on load.
        let document = self
            .get_document(&KeyPath::root(), true)?
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
        let payload = serde_json::to_vec(&document)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| io_err("create", &e))?;
        writeln!(file, "{:08x}", checksum(&payload)).map_err(|e| io_err("write", &e))?;
        file.write_all(&payload).map_err(|e| io_err("write", &e))?;
        file.sync_all().map_err(|e| io_err("sync", &e))?;
        fs::rename(&tmp, path).map_err(|e| io_err("rename", &e))?;
        Ok(())
    }

    /// Loads a snapshot previously written by [`Self::save_snapshot`],
    /// replacing the current tree.
    ///
    /// # Errors
    /// `BackendError` on I/O failure or checksum mismatch,
    /// `SerializationError` if the payload is not valid JSON.
    pub fn load_snapshot(&self, path: &Path) -> Result<(), StorageError> {
        let raw = fs::read(path).map_err(|e| io_err("read", &e))?;
        let newline = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| StorageError::BackendError("snapshot missing header".to_string()))?;
        let header = std::str::from_utf8(&raw[..newline])
            .map_err(|_| StorageError::BackendError("snapshot header not utf-8".to_string()))?;
        let expected = u32::from_str_radix(header.trim(), 16)
            .map_err(|_| StorageError::BackendError("snapshot header not a checksum".to_string()))?;

        let payload = &raw[newline + 1..];
        let actual = checksum(payload);
        if actual != expected {
            return Err(StorageError::BackendError(format!(
                "snapshot checksum mismatch: expected {expected:08x} actual {actual:08x}"
            )));
        }

        let document: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.replace_root(node_from_snapshot(&document))?;
        Ok(())
    }

    /// Opens a store from `path`, or a fresh empty store if no snapshot
    /// exists there yet.
    pub fn open_snapshot(path: &Path) -> Result<Self, StorageError> {
        let store = Self::new();
        if path.exists() {
            store.load_snapshot(path)?;
        }
        Ok(store)
    }
}

fn node_from_snapshot(document: &serde_json::Value) -> Node {
    Node::from_json(document)
}
