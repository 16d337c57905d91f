//! Database facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{Collation, Index, IndexDefinition};
use crate::session::Session;
use crate::stats::StatsSnapshot;
use crate::transaction::{CleanupStats, Transaction, TransactionManager};
use crate::types::{CollectionId, SequenceNumber};
use parking_lot::RwLock;
use std::sync::Arc;

/// The main database handle.
///
/// `Database` is the entry point for VineDB. It provides:
/// - Class and index management
/// - Physical transactions through [`Database::begin`] and
///   [`Database::transaction`]
/// - Sessions with nested scopes through [`Database::session`]
/// - Version cleanup and statistics
///
/// ```rust,ignore
/// use vinedb_core::{Database, IndexDefinition, IndexField, IndexKind, IndexType, PropertyType};
///
/// let db = Database::open_in_memory()?;
/// db.create_class("Person")?;
/// db.create_index(IndexDefinition::new(
///     "Person.name",
///     "Person",
///     IndexKind::Property(IndexField::new("name", PropertyType::String)),
///     IndexType::Unique,
/// )?)?;
///
/// db.transaction(|txn| {
///     txn.new_record("Person")?.set_property("name", "ann");
///     Ok(())
/// })?;
/// ```
///
/// The handle is `Send + Sync`; share it between threads with `Arc` and
/// give every thread its own sessions or transactions.
pub struct Database {
    /// Transaction manager, which owns all committed state.
    manager: Arc<TransactionManager>,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens an empty in-memory database with the default configuration.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_config(Config::default())
    }

    /// Opens an empty in-memory database.
    pub fn open_with_config(config: Config) -> CoreResult<Self> {
        tracing::debug!(?config, "opening database");
        Ok(Self {
            manager: Arc::new(TransactionManager::new(config)),
            is_open: RwLock::new(true),
        })
    }

    /// Registers a record class.
    pub fn create_class(&self, name: &str) -> CoreResult<CollectionId> {
        self.ensure_open()?;
        let class = self.manager.registry().create_class(name)?;
        tracing::info!(class = %name, collection = %class.id(), "class created");
        Ok(class.id())
    }

    /// Returns the collection of a class.
    pub fn class(&self, name: &str) -> CoreResult<CollectionId> {
        Ok(self.manager.registry().class(name)?.id())
    }

    /// Names of all classes.
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        self.manager.registry().class_names()
    }

    /// Creates an index and builds it from the records already committed.
    ///
    /// A definition without an explicit null policy gets
    /// [`Config::ignore_null_values`].
    pub fn create_index(&self, mut definition: IndexDefinition) -> CoreResult<Arc<Index>> {
        self.ensure_open()?;
        definition.apply_default_null_policy(self.config().ignore_null_values);
        self.manager.create_index(definition)
    }

    /// Returns an index by name.
    pub fn index(&self, name: &str) -> CoreResult<Arc<Index>> {
        self.manager.registry().index(name)
    }

    /// All indexes, in name order.
    #[must_use]
    pub fn indexes(&self) -> Vec<Arc<Index>> {
        self.manager.registry().indexes()
    }

    /// Drops an index. Changes staged for it by running transactions are
    /// discarded at their commit.
    pub fn drop_index(&self, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.manager.drop_index(name)
    }

    /// Changes the collation of an indexed field and rebuilds the index.
    ///
    /// Transactions that staged changes for the index before the rebuild
    /// fail at commit with [`CoreError::Rollback`].
    pub fn set_collation(&self, index: &str, field: &str, collation: Collation) -> CoreResult<()> {
        self.ensure_open()?;
        self.manager.set_collation(index, field, collation)
    }

    /// Begins a physical transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        Ok(self.manager.begin())
    }

    /// Opens a session.
    #[must_use]
    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Drops record versions and index lifespans no snapshot can observe.
    pub fn cleanup(&self) -> CoreResult<CleanupStats> {
        self.ensure_open()?;
        Ok(self.manager.cleanup())
    }

    /// Returns counters plus live record and index entry gauges.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.manager.stats().snapshot();
        snapshot.live_records = self
            .manager
            .records()
            .live_count(self.committed_seq()) as u64;
        snapshot.index_entries = self
            .indexes()
            .iter()
            .map(|index| index.committed_size() as u64)
            .sum();
        snapshot
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.manager.committed_seq()
    }

    /// Returns the number of running physical transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.manager.active_count()
    }

    /// Closes the database. Running transactions can still finish.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        tracing::debug!(active = self.active_transactions(), "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the database is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.manager.config()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("committed_seq", &self.committed_seq())
            .field("active_transactions", &self.active_transactions())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
