//! # clinicache - Patient Record Multi-Index Cache
//!
//! clinicache ingests clinical records ("headings") for a patient from
//! one or more origin record systems, caches them under several
//! independent lookup keys, and reconciles them against an externally
//! supplied discovery feed that may reference the same clinical facts
//! under different identifiers.
//!
//! ## Core Concepts
//!
//! - **Record**: one cached clinical heading instance, canonical copy
//!   plus pointer-only secondary indices
//! - **Session partition**: an isolated read-serving cache per active
//!   client context, invalidated across the board when upstream data
//!   changes
//! - **Discovery link**: a bijective mapping between a feed's id and
//!   the internally assigned source id, driving merge and revert
//! - **Status record**: a per-patient `loading_data -> ready` state
//!   machine polled by clients to decide when to re-fetch
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use clinicache::{
//!     CacheConfig, CacheEngine, DiscoveryRecord, Heading,
//!     InMemoryDocumentStore, InMemorySessionRegistry, PatientId,
//! };
//!
//! let engine = CacheEngine::new(
//!     Arc::new(InMemoryDocumentStore::new()),
//!     Arc::new(InMemorySessionRegistry::new()),
//!     CacheConfig::default(),
//! );
//!
//! let patient = PatientId::from(9_999_999_000_i64);
//! let outcome = engine
//!     .merge_discovery_data(
//!         "ethercis",
//!         &patient,
//!         &Heading::from("procedures"),
//!         &[DiscoveryRecord::new("d1")],
//!     )
//!     .unwrap();
//! assert_eq!(outcome.merged, 1);
//! ```
//!
//! The core is a library, not a network service: transport, session
//! authentication, schema transformation, and the outbound clients that
//! actually fetch records are collaborators that hand the engine plain
//! values and consume plain results.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod record;
pub mod session;
pub mod status;
pub mod store;

// Re-export primary types at crate root for convenience
pub use broadcast::InvalidationBroadcaster;
pub use cache::{ByDateIndex, ByHeadingIndex, ByHostIndex, Direction, QueryOptions, RecordCache};
pub use config::{CacheConfig, HeadingSet, DEFAULT_HEADINGS};
pub use discovery::{
    DiscoveryEngine, DiscoveryLink, DiscoveryRecord, LinkTable, MergeOutcome, RevertReceipt,
    FINISHED_SENTINEL,
};
pub use engine::CacheEngine;
pub use error::{CacheError, CacheResult, ValidationError};
pub use events::{EventBus, EventStream, InvalidationEvent, SubscriptionId};
pub use record::{Heading, PatientId, Record, RecordBuilder, SourceId};
pub use session::{InMemorySessionRegistry, SessionHandle, SessionId, SessionRegistry};
pub use status::{LoadStatus, StatusRecord, StatusTracker};
pub use store::{DocumentStore, InMemoryDocumentStore, KeyPath, Scalar, Segment, StorageError};
