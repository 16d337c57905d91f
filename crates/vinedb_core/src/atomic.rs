//! Transaction-scoped staging of index changes.

use crate::index::IndexKey;
use crate::types::{RecordId, SequenceNumber, TransactionId};
use std::collections::BTreeMap;

/// Direction of a staged index change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagedOp {
    /// Associate the key with the record.
    Put,
    /// Dissociate the key from the record.
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagedChange {
    pub op: StagedOp,
    pub stamp: u64,
}

/// One staged change, as reported by [`AtomicOperation::staged`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    /// Index key.
    pub key: IndexKey,
    /// Record.
    pub record: RecordId,
    /// Direction.
    pub op: StagedOp,
}

/// Staged changes of one index.
///
/// Holds at most one change per (key, record): the net difference between
/// the committed state at the transaction snapshot and what the
/// transaction wants.
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexChanges {
    entries: BTreeMap<IndexKey, BTreeMap<RecordId, StagedChange>>,
    /// Index generation the keys were computed against.
    generation: u64,
}

impl IndexChanges {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: &IndexKey) -> Option<&BTreeMap<RecordId, StagedChange>> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &BTreeMap<RecordId, StagedChange>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All changes in the order they were staged.
    pub fn in_stamp_order(&self) -> Vec<(&IndexKey, RecordId, StagedOp)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .flat_map(|(key, by_record)| {
                by_record
                    .iter()
                    .map(move |(rid, change)| (change.stamp, key, *rid, change.op))
            })
            .collect();
        out.sort_by_key(|(stamp, ..)| *stamp);
        out.into_iter()
            .map(|(_, key, rid, op)| (key, rid, op))
            .collect()
    }
}

/// Staging area for the index changes of one physical transaction.
///
/// Writes accumulate here without touching committed index state. Reads
/// through an index overlay these changes on the committed state as of
/// [`AtomicOperation::snapshot`]. The changes are merged at commit or
/// dropped at rollback.
#[derive(Debug)]
pub struct AtomicOperation {
    id: TransactionId,
    snapshot: SequenceNumber,
    changes: BTreeMap<String, IndexChanges>,
    next_stamp: u64,
}

impl AtomicOperation {
    pub(crate) fn new(id: TransactionId, snapshot: SequenceNumber) -> Self {
        Self {
            id,
            snapshot,
            changes: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    /// Returns the owning transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the committed sequence this operation reads at.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of staged (key, record) changes across all indexes.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.changes.values().map(IndexChanges::len).sum()
    }

    /// Staged changes of one index, in staging order.
    #[must_use]
    pub fn staged(&self, index: &str) -> Vec<StagedEntry> {
        self.changes
            .get(index)
            .map(|changes| {
                changes
                    .in_stamp_order()
                    .into_iter()
                    .map(|(key, record, op)| StagedEntry {
                        key: key.clone(),
                        record,
                        op,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn changes_for(&self, index: &str) -> Option<&IndexChanges> {
        self.changes.get(index)
    }

    pub(crate) fn changes(&self) -> impl Iterator<Item = (&String, &IndexChanges)> {
        self.changes.iter()
    }

    /// Stages a change. `committed_visible` tells whether the association
    /// exists at the snapshot; a change that would restore that state
    /// cancels whatever was staged before.
    pub(crate) fn stage(
        &mut self,
        index: &str,
        generation: u64,
        key: IndexKey,
        rid: RecordId,
        op: StagedOp,
        committed_visible: bool,
    ) {
        let wants_visible = op == StagedOp::Put;
        if wants_visible == committed_visible {
            self.unstage(index, &key, rid);
            return;
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.changes
            .entry(index.to_string())
            .or_insert_with(|| IndexChanges {
                entries: BTreeMap::new(),
                generation,
            })
            .entries
            .entry(key)
            .or_default()
            .insert(rid, StagedChange { op, stamp });
    }

    fn unstage(&mut self, index: &str, key: &IndexKey, rid: RecordId) {
        let Some(changes) = self.changes.get_mut(index) else {
            return;
        };
        if let Some(by_record) = changes.entries.get_mut(key) {
            by_record.remove(&rid);
            if by_record.is_empty() {
                changes.entries.remove(key);
            }
        }
        if changes.is_empty() {
            self.changes.remove(index);
        }
    }

    /// Drops the staged changes of one index.
    pub(crate) fn discard_index(&mut self, index: &str) {
        self.changes.remove(index);
    }

    /// Drops everything staged.
    pub(crate) fn clear(&mut self) {
        self.changes.clear();
    }
}
