//! Keyed document store: the single storage primitive everything else
//! is built on.
//!
//! A store is a tree of nodes addressed by [`KeyPath`]s, with [`Scalar`]
//! leaves. The [`DocumentStore`] trait is the contract; the in-memory
//! backend is the reference implementation, with optional snapshot
//! persistence behind the `persistent` feature.

mod memory;
mod path;
#[cfg(feature = "persistent")]
mod snapshot;
mod traits;

pub use memory::InMemoryDocumentStore;
pub use path::{KeyPath, Segment};
pub use traits::{DocumentStore, Scalar, StorageError};
