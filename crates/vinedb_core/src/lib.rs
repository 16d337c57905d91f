//! # VineDB Core
//!
//! Transactional core of VineDB, an in-memory multi-model database.
//!
//! This crate provides:
//! - Records with typed properties and change-tracked collections
//!   (lists, sets, maps and link bags)
//! - Multi-version concurrency control with snapshot reads and optimistic
//!   version validation at commit
//! - Secondary indexes (unique, non-unique, hash) kept in step with record
//!   changes, incrementally from collection change timelines when possible
//! - An atomic operation that stages index changes so a transaction reads
//!   its own writes before anything is published
//! - Sessions with nested transaction scopes
//!
//! ## Example
//!
//! ```rust
//! use vinedb_core::{Database, IndexDefinition, IndexField, IndexKey, IndexKind, IndexType, PropertyType};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.create_class("Person").unwrap();
//! db.create_index(
//!     IndexDefinition::new(
//!         "Person.name",
//!         "Person",
//!         IndexKind::Property(IndexField::new("name", PropertyType::String)),
//!         IndexType::Unique,
//!     )
//!     .unwrap(),
//! )
//! .unwrap();
//!
//! let mut txn = db.begin().unwrap();
//! txn.new_record("Person").unwrap().set_property("name", "ann");
//! let found = txn.query_identities("Person.name", &IndexKey::single("ann")).unwrap();
//! assert_eq!(found.len(), 1);
//! txn.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod config;
mod database;
mod error;
mod index;
mod maintenance;
mod record;
mod session;
mod stats;
mod tracked;
mod transaction;
mod types;
mod value;

pub use atomic::{AtomicOperation, StagedEntry, StagedOp};
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use index::{
    Collation, ConditionOp, ExtractionMode, Index, IndexDefinition, IndexField, IndexKey,
    IndexKind, IndexRange, IndexType, KeyBound, KeyCondition,
};
pub use record::{CheckpointView, ContainerMut, PropertySource, Record};
pub use session::{Session, SessionState};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use tracked::{
    ChangeEvent, ChangeKind, DeltaCounter, EventKey, LinkBag, LinkBagEntry, OwnerLink, Timeline,
    TrackedList, TrackedMap, TrackedSet, DEFAULT_TREE_THRESHOLD,
};
pub use transaction::{CleanupStats, Transaction, TransactionManager, TransactionState};
pub use types::{CollectionId, ParseRecordIdError, RecordId, SequenceNumber, TransactionId};
pub use value::{EmbeddedRecord, PropertyMap, PropertyType, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
