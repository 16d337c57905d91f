//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{Collation, Index, IndexDefinition, SchemaRegistry};
use crate::record::{Record, RecordStore, RecordVersion};
use crate::stats::DatabaseStats;
use crate::transaction::state::{Transaction, TransactionState};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleanupStats {
    /// Oldest sequence any current or future snapshot can read at.
    pub horizon: SequenceNumber,
    /// Record versions dropped.
    pub versions_dropped: usize,
    /// Deleted records dropped entirely.
    pub records_dropped: usize,
    /// Index lifespans dropped.
    pub index_entries_dropped: usize,
}

/// What a successful commit published.
struct Published {
    seq: SequenceNumber,
    versions: usize,
    index_changes: usize,
}

/// Owns the committed state of a database and serializes commits.
///
/// The transaction manager provides:
/// - Snapshot reads: every transaction reads at the committed sequence
///   current when it began
/// - Optimistic concurrency: record versions are validated at commit
/// - All-or-nothing publication of record versions and index changes
/// - Snapshot registration, which bounds what cleanup may drop
///
/// ## Commit critical section
///
/// Validation, uniqueness checks and publication run under one lock.
/// Schema changes that rebuild an index take the same lock, so a rebuild
/// never interleaves with a commit.
pub struct TransactionManager {
    config: Config,
    registry: SchemaRegistry,
    records: RecordStore,
    stats: DatabaseStats,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Latest published sequence.
    committed_seq: AtomicU64,
    /// Commit critical section.
    commit_lock: Mutex<()>,
    /// Registered snapshots with their reader counts.
    snapshots: Mutex<BTreeMap<SequenceNumber, usize>>,
    /// Publishing commits, for automatic cleanup.
    commits: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager over an empty database.
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            registry: SchemaRegistry::new(),
            records: RecordStore::new(),
            stats: DatabaseStats::new(),
            next_txid: AtomicU64::new(1),
            committed_seq: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            snapshots: Mutex::new(BTreeMap::new()),
            commits: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn records(&self) -> &RecordStore {
        &self.records
    }

    pub(crate) fn stats(&self) -> &DatabaseStats {
        &self.stats
    }

    /// Begins a transaction reading at the current committed sequence.
    pub(crate) fn begin(self: &Arc<Self>) -> Transaction {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        // Registering under the snapshot lock keeps cleanup from computing
        // a horizon past a snapshot that is about to be taken.
        let snapshot = {
            let mut snapshots = self.snapshots.lock();
            let seq = self.committed_seq();
            *snapshots.entry(seq).or_insert(0) += 1;
            seq
        };
        self.stats.record_transaction_start();
        tracing::debug!(txn = %id, snapshot = snapshot.as_u64(), "begin");
        Transaction::new(Arc::clone(self), id, snapshot)
    }

    /// Commits a transaction.
    ///
    /// Flushes pending record changes, then under the commit lock:
    /// validates record versions, checks unique indexes against the latest
    /// committed state, installs new record versions and merges staged
    /// index changes at a new sequence. Any failure rolls the transaction
    /// back and leaves committed state untouched.
    pub(crate) fn commit(&self, txn: &mut Transaction) -> CoreResult<SequenceNumber> {
        txn.ensure_active()?;
        if let Err(err) = txn.flush() {
            self.fail(txn, &err);
            return Err(err);
        }
        txn.set_state(TransactionState::Committing);

        let result = {
            let _commit_guard = self.commit_lock.lock();
            self.commit_inner(txn)
        };
        match result {
            Ok(published) => {
                txn.set_state(TransactionState::Committed);
                txn.discard();
                self.release(txn.snapshot());
                self.stats.record_transaction_commit(
                    published.versions as u64,
                    published.index_changes as u64,
                );
                tracing::debug!(
                    txn = %txn.id(),
                    seq = published.seq.as_u64(),
                    versions = published.versions,
                    index_changes = published.index_changes,
                    "commit"
                );
                Ok(published.seq)
            }
            Err(err) => {
                self.fail(txn, &err);
                Err(err)
            }
        }
    }

    /// Internal commit implementation that assumes the lock is held.
    fn commit_inner(&self, txn: &Transaction) -> CoreResult<Published> {
        self.validate(txn)?;
        self.check_index_set(txn)?;

        let mut indexes = Vec::new();
        for (name, changes) in txn.op().changes() {
            // Changes staged for an index dropped since are discarded.
            let Ok(index) = self.registry.index(name) else {
                continue;
            };
            index.check_generation(changes)?;
            index.check_unique(changes)?;
            indexes.push((index, changes));
        }

        let writes: Vec<&Record> = txn
            .records()
            .values()
            .filter(|r| r.is_modified() && !(r.is_new() && r.is_deleted()))
            .collect();
        if writes.is_empty() && indexes.is_empty() {
            return Ok(Published {
                seq: self.committed_seq(),
                versions: 0,
                index_changes: 0,
            });
        }

        let seq = self.committed_seq().next();
        for record in &writes {
            let data = (!record.is_deleted()).then(|| Arc::new(record.properties().clone()));
            self.records.install(
                record.id(),
                RecordVersion {
                    seq,
                    version: record.version() + 1,
                    data,
                },
            );
        }
        let mut index_changes = 0;
        for (index, changes) in &indexes {
            index_changes += index.merge(changes, seq);
        }
        self.committed_seq.store(seq.as_u64(), Ordering::SeqCst);

        let commits = self.commits.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.cleanup_interval > 0 && commits % self.config.cleanup_interval == 0 {
            self.cleanup_inner();
        }

        Ok(Published {
            seq,
            versions: writes.len(),
            index_changes,
        })
    }

    /// Fails with `Conflict` if a record this transaction modified was
    /// committed by someone else after it was loaded.
    fn validate(&self, txn: &Transaction) -> CoreResult<()> {
        for record in txn.records().values() {
            if !record.is_modified() || record.is_new() {
                continue;
            }
            let actual = self.records.latest_version(record.id()).unwrap_or(0);
            if actual != record.version() {
                return Err(CoreError::Conflict {
                    record: record.id(),
                    expected: record.version(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Fails with `Rollback` if an index over a written record was
    /// registered after the record was flushed. Its build never saw the
    /// changes this transaction already staged.
    fn check_index_set(&self, txn: &Transaction) -> CoreResult<()> {
        for record in txn.records().values() {
            if record.is_new() && record.is_deleted() {
                continue;
            }
            let Some(flushed_at) = record.flushed_at() else {
                continue;
            };
            let late = self
                .registry
                .indexes_for_class(record.class())
                .into_iter()
                .find(|index| index.registered_at() > flushed_at);
            if let Some(index) = late {
                return Err(CoreError::rollback(format!(
                    "index '{}' was created while the transaction was running",
                    index.name()
                )));
            }
        }
        Ok(())
    }

    /// Rolls back an active transaction.
    pub(crate) fn rollback(&self, txn: &mut Transaction) {
        if !txn.is_active() {
            return;
        }
        self.finish_rollback(txn);
    }

    fn fail(&self, txn: &mut Transaction, err: &CoreError) {
        match err {
            CoreError::Conflict { .. } => {
                self.stats.record_conflict();
                tracing::warn!(txn = %txn.id(), error = %err, "commit conflict");
            }
            CoreError::UniquenessViolation { .. } => {
                self.stats.record_uniqueness_violation();
                tracing::warn!(txn = %txn.id(), error = %err, "uniqueness violation");
            }
            _ => tracing::debug!(txn = %txn.id(), error = %err, "commit failed"),
        }
        self.finish_rollback(txn);
    }

    fn finish_rollback(&self, txn: &mut Transaction) {
        let staged = txn.op().staged_count();
        txn.set_state(TransactionState::RolledBack);
        txn.discard();
        self.release(txn.snapshot());
        self.stats.record_transaction_rollback();
        tracing::debug!(txn = %txn.id(), staged, "rollback");
    }

    fn release(&self, snapshot: SequenceNumber) {
        let mut snapshots = self.snapshots.lock();
        if let Some(count) = snapshots.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                snapshots.remove(&snapshot);
            }
        }
    }

    /// Oldest sequence a registered or future snapshot can read at.
    pub(crate) fn horizon(&self) -> SequenceNumber {
        let snapshots = self.snapshots.lock();
        snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.committed_seq())
    }

    /// Drops record versions and index lifespans below the horizon.
    pub(crate) fn cleanup(&self) -> CleanupStats {
        let _commit_guard = self.commit_lock.lock();
        self.cleanup_inner()
    }

    fn cleanup_inner(&self) -> CleanupStats {
        let horizon = self.horizon();
        let (versions_dropped, records_dropped) = self.records.cleanup(horizon);
        let index_entries_dropped = self
            .registry
            .indexes()
            .iter()
            .map(|index| index.cleanup(horizon))
            .sum();
        self.stats
            .record_cleanup(versions_dropped as u64, index_entries_dropped as u64);
        tracing::debug!(
            horizon = horizon.as_u64(),
            versions_dropped,
            records_dropped,
            index_entries_dropped,
            "cleanup"
        );
        CleanupStats {
            horizon,
            versions_dropped,
            records_dropped,
            index_entries_dropped,
        }
    }

    /// Builds a new index from the committed record histories of its class
    /// and registers it.
    pub(crate) fn create_index(&self, definition: IndexDefinition) -> CoreResult<Arc<Index>> {
        let _commit_guard = self.commit_lock.lock();
        self.registry.check_new_index(&definition)?;
        let class = self.registry.class(definition.class())?;
        let index = Arc::new(Index::new(definition));
        index.rebuild(&self.records.chains_for(class.id()), self.registry.next_epoch())?;
        self.registry.register_index(Arc::clone(&index))?;
        tracing::info!(
            index = %index.name(),
            class = %class.name(),
            index_type = %index.index_type(),
            "index created"
        );
        Ok(index)
    }

    /// Changes the collation of one field and rebuilds the index.
    pub(crate) fn set_collation(&self, name: &str, path: &str, collation: Collation) -> CoreResult<()> {
        let _commit_guard = self.commit_lock.lock();
        let index = self.registry.index(name)?;
        let definition = index.definition();
        let previous = definition
            .fields()
            .iter()
            .find(|f| f.path() == path)
            .map(|f| f.collation())
            .ok_or_else(|| CoreError::PropertyNotIndexed {
                index: name.to_string(),
                property: path.to_string(),
            })?;
        let class = self.registry.class(definition.class())?;
        index.set_collation(path, collation)?;
        let generation = self.registry.next_epoch();
        if let Err(err) = index.rebuild(&self.records.chains_for(class.id()), generation) {
            index.set_collation(path, previous)?;
            return Err(err);
        }
        tracing::info!(index = %name, field = %path, collation = %collation, "collation changed");
        Ok(())
    }

    pub(crate) fn drop_index(&self, name: &str) -> CoreResult<()> {
        let _commit_guard = self.commit_lock.lock();
        self.registry.drop_index(name)?;
        tracing::info!(index = %name, "index dropped");
        Ok(())
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.snapshots.lock().values().sum()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}
