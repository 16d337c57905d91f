//! Physical transaction state.

use crate::atomic::AtomicOperation;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexKey, IndexRange};
use crate::maintenance;
use crate::record::Record;
use crate::transaction::manager::TransactionManager;
use crate::types::{RecordId, SequenceNumber, TransactionId};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Commit is validating and publishing.
    Committing,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// A physical transaction.
///
/// Reads see committed state as of [`Transaction::snapshot`] overlaid with
/// this transaction's own changes. Record changes stay in private working
/// copies and index changes on the transaction's [`AtomicOperation`] until
/// [`Transaction::commit`].
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    manager: Arc<TransactionManager>,
    /// Transaction ID.
    id: TransactionId,
    /// Committed sequence the transaction reads at.
    snapshot: SequenceNumber,
    /// Current state.
    state: TransactionState,
    /// Working copies of every record touched so far.
    records: BTreeMap<RecordId, Record>,
    /// Staged index changes.
    op: AtomicOperation,
}

impl Transaction {
    pub(crate) fn new(
        manager: Arc<TransactionManager>,
        id: TransactionId,
        snapshot: SequenceNumber,
    ) -> Self {
        Self {
            manager,
            id,
            snapshot,
            state: TransactionState::Active,
            records: BTreeMap::new(),
            op: AtomicOperation::new(id, snapshot),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot sequence number.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Creates a record of `class`. It gets version 1 when committed.
    pub fn new_record(&mut self, class: &str) -> CoreResult<&mut Record> {
        self.ensure_active()?;
        let info = self.manager.registry().class(class)?;
        let rid = info.allocate();
        let mut record = Record::new(rid, Arc::clone(info.name()));
        record.set_link_bag_threshold(self.manager.config().link_bag_tree_threshold);
        Ok(self.records.entry(rid).or_insert(record))
    }

    /// Returns this transaction's working copy of a record, loading it from
    /// the snapshot on first access.
    pub fn load(&mut self, rid: RecordId) -> CoreResult<&mut Record> {
        self.ensure_active()?;
        match self.records.entry(rid) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                if record.is_deleted() {
                    return Err(CoreError::RecordNotFound { record: rid });
                }
                Ok(record)
            }
            Entry::Vacant(entry) => {
                let (version, data) = self
                    .manager
                    .records()
                    .read_at(rid, self.snapshot)
                    .ok_or(CoreError::RecordNotFound { record: rid })?;
                let class = self
                    .manager
                    .registry()
                    .class_by_id(rid.collection())
                    .ok_or(CoreError::RecordNotFound { record: rid })?;
                let mut record = Record::from_committed(rid, Arc::clone(class.name()), version, data);
                record.set_link_bag_threshold(self.manager.config().link_bag_tree_threshold);
                Ok(entry.insert(record))
            }
        }
    }

    /// Returns true if `rid` exists for this transaction.
    pub fn exists(&mut self, rid: RecordId) -> bool {
        self.load(rid).is_ok()
    }

    /// Deletes a record. Its index entries are removed at the next flush.
    pub fn delete(&mut self, rid: RecordId) -> CoreResult<()> {
        self.load(rid)?.delete();
        Ok(())
    }

    /// Records touched by this transaction, deleted ones included.
    pub fn touched_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Pushes every pending record change through index maintenance onto
    /// the atomic operation. Returns the number of staged changes.
    pub fn flush(&mut self) -> CoreResult<usize> {
        self.ensure_active()?;
        let mut staged = 0;
        for record in self.records.values_mut() {
            if !record.is_dirty() {
                continue;
            }
            let (indexes, epoch) = self.manager.registry().indexes_for_class_at(record.class());
            record.note_flush(epoch);
            staged += maintenance::flush_record(&indexes, &mut self.op, record)?;
        }
        Ok(staged)
    }

    /// Flushes and returns the atomic operation, for reading indexes as
    /// this transaction sees them.
    pub fn atomic_operation(&mut self) -> CoreResult<&AtomicOperation> {
        self.flush()?;
        Ok(&self.op)
    }

    /// Flushes and returns the atomic operation for direct staging through
    /// [`Index::put`](crate::Index::put) and
    /// [`Index::remove`](crate::Index::remove).
    pub fn atomic_operation_mut(&mut self) -> CoreResult<&mut AtomicOperation> {
        self.flush()?;
        Ok(&mut self.op)
    }

    /// Records an index maps `key` to.
    pub fn query_identities(&mut self, index: &str, key: &IndexKey) -> CoreResult<Vec<RecordId>> {
        let index = self.manager.registry().index(index)?;
        index.get_identities(self.atomic_operation()?, key)
    }

    /// Records whose key starts with the partial key `prefix`.
    pub fn query_identities_by_prefix(
        &mut self,
        index: &str,
        prefix: &IndexKey,
    ) -> CoreResult<Vec<RecordId>> {
        let index = self.manager.registry().index(index)?;
        index.get_identities_by_prefix(self.atomic_operation()?, prefix)
    }

    /// (key, record) pairs of an ordered index inside `range`.
    pub fn range(
        &mut self,
        index: &str,
        range: &IndexRange,
        ascending: bool,
    ) -> CoreResult<Vec<(IndexKey, RecordId)>> {
        let index = self.manager.registry().index(index)?;
        index.range(self.atomic_operation()?, range, ascending)
    }

    /// Number of associations in an index as this transaction sees it.
    pub fn index_size(&mut self, index: &str) -> CoreResult<usize> {
        let index = self.manager.registry().index(index)?;
        Ok(index.size(self.atomic_operation()?))
    }

    /// Validates and publishes the transaction.
    ///
    /// On failure the transaction is rolled back and nothing it did is
    /// visible.
    pub fn commit(mut self) -> CoreResult<SequenceNumber> {
        let manager = Arc::clone(&self.manager);
        manager.commit(&mut self)
    }

    /// Discards every change of the transaction.
    pub fn rollback(mut self) {
        let manager = Arc::clone(&self.manager);
        manager.rollback(&mut self);
    }

    pub(crate) fn records(&self) -> &BTreeMap<RecordId, Record> {
        &self.records
    }

    pub(crate) fn op(&self) -> &AtomicOperation {
        &self.op
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Drops working copies and staged changes.
    pub(crate) fn discard(&mut self) {
        self.records.clear();
        self.op.clear();
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committing => {
                Err(CoreError::invalid_operation("transaction is committing"))
            }
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::RolledBack => {
                Err(CoreError::invalid_operation("transaction already rolled back"))
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .field("staged", &self.op.staged_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            let manager = Arc::clone(&self.manager);
            manager.rollback(self);
        }
    }
}
