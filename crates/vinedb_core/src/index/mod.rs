//! Secondary indexes.
//!
//! An [`Index`] maps keys derived from record properties to record
//! identities. Committed entries live in an [`EntryStore`](storage) with
//! per-association lifespans, so every transaction reads the index as of
//! its snapshot. Transactions never write committed entries directly:
//! [`Index::put`] and [`Index::remove`] stage changes on the transaction's
//! [`AtomicOperation`], and every read overlays those staged changes.
//!
//! # Index Types
//!
//! - `Unique` / `NotUnique`: ordered storage, range scans
//! - `UniqueHash` / `NotUniqueHash`: hashed storage, point lookups only

mod collate;
mod definition;
mod key;
mod registry;
mod storage;

pub use collate::Collation;
pub use definition::{ExtractionMode, IndexDefinition, IndexField, IndexKind, IndexType};
pub use key::{ConditionOp, IndexKey, IndexRange, KeyBound, KeyCondition};
pub(crate) use registry::{ClassInfo, SchemaRegistry};

use crate::atomic::{AtomicOperation, IndexChanges, StagedOp};
use crate::error::{CoreError, CoreResult};
use crate::record::VersionChain;
use crate::types::{RecordId, SequenceNumber};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use storage::EntryStore;

/// A secondary index over one class.
#[derive(Debug)]
pub struct Index {
    name: String,
    definition: RwLock<IndexDefinition>,
    entries: RwLock<Box<dyn EntryStore>>,
    /// Replaced by every rebuild with a value no other index instance
    /// holds. Staged keys from another generation cannot be merged.
    generation: AtomicU64,
    /// Epoch at which the index became visible to transactions.
    registered_at: AtomicU64,
}

impl Index {
    pub(crate) fn new(definition: IndexDefinition) -> Self {
        let hashed = definition.index_type().is_hash();
        Self {
            name: definition.name().to_string(),
            definition: RwLock::new(definition),
            entries: RwLock::new(storage::new_store(hashed)),
            generation: AtomicU64::new(0),
            registered_at: AtomicU64::new(0),
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the current definition.
    #[must_use]
    pub fn definition(&self) -> IndexDefinition {
        self.definition.read().clone()
    }

    /// Returns the index type.
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.definition.read().index_type()
    }

    /// Stages an association of `key` with `rid`.
    pub fn put(&self, op: &mut AtomicOperation, key: &IndexKey, rid: RecordId) -> CoreResult<()> {
        let key = self.definition.read().normalize_key(key)?;
        self.stage(op, key, rid, StagedOp::Put);
        Ok(())
    }

    /// Stages the removal of an association of `key` with `rid`.
    pub fn remove(&self, op: &mut AtomicOperation, key: &IndexKey, rid: RecordId) -> CoreResult<()> {
        let key = self.definition.read().normalize_key(key)?;
        self.stage(op, key, rid, StagedOp::Remove);
        Ok(())
    }

    /// Stages a change for a key already in stored form.
    pub(crate) fn stage(&self, op: &mut AtomicOperation, key: IndexKey, rid: RecordId, kind: StagedOp) {
        let visible = self.entries.read().is_visible(&key, rid, op.snapshot());
        tracing::trace!(index = %self.name, key = %key, record = %rid, op = ?kind, "stage");
        let generation = self.generation();
        op.stage(&self.name, generation, key, rid, kind, visible);
    }

    /// Records associated with `key`, as seen by `op`.
    pub fn get_identities(&self, op: &AtomicOperation, key: &IndexKey) -> CoreResult<Vec<RecordId>> {
        let key = self.definition.read().normalize_key(key)?;
        let entries = self.entries.read();
        let mut ids = entries.identities_at(&key, op.snapshot());
        if let Some(changes) = op.changes_for(&self.name) {
            overlay(&mut ids, changes, &key);
        }
        Ok(ids.into_iter().collect())
    }

    /// Records whose key starts with the partial key `prefix`.
    pub fn get_identities_by_prefix(
        &self,
        op: &AtomicOperation,
        prefix: &IndexKey,
    ) -> CoreResult<Vec<RecordId>> {
        let mut ids: Vec<_> = self
            .range(op, &IndexRange::exact(prefix.clone()), true)?
            .into_iter()
            .map(|(_, rid)| rid)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Every key with at least one record, in key order, as seen by `op`.
    #[doc(alias = "key_stream")]
    pub fn stream_keys(&self, op: &AtomicOperation) -> Vec<IndexKey> {
        self.merged_view(op, None)
            .into_keys()
            .collect()
    }

    /// (key, record) pairs for the given keys, deduplicated, in key order
    /// or reverse key order.
    pub fn stream_entries(
        &self,
        op: &AtomicOperation,
        keys: &[IndexKey],
        ascending: bool,
    ) -> CoreResult<Vec<(IndexKey, RecordId)>> {
        let definition = self.definition.read();
        let keys: BTreeSet<IndexKey> = keys
            .iter()
            .map(|k| definition.normalize_key(k))
            .collect::<CoreResult<_>>()?;
        drop(definition);

        let entries = self.entries.read();
        let changes = op.changes_for(&self.name);
        let mut out = Vec::new();
        for key in keys {
            let mut ids = entries.identities_at(&key, op.snapshot());
            if let Some(changes) = changes {
                overlay(&mut ids, changes, &key);
            }
            out.extend(ids.into_iter().map(|rid| (key.clone(), rid)));
        }
        if !ascending {
            out.reverse();
        }
        Ok(out)
    }

    /// (key, record) pairs with keys inside `range`, as seen by `op`.
    ///
    /// Fails with `UnsupportedQuery` on hash indexes.
    pub fn range(
        &self,
        op: &AtomicOperation,
        range: &IndexRange,
        ascending: bool,
    ) -> CoreResult<Vec<(IndexKey, RecordId)>> {
        if self.index_type().is_hash() {
            return Err(CoreError::unsupported_query(&self.name, "range queries"));
        }
        let range = {
            let definition = self.definition.read();
            range.try_map_keys(|k| definition.normalize_key(k))?
        };
        let mut out: Vec<(IndexKey, RecordId)> = self
            .merged_view(op, Some(&range))
            .into_iter()
            .flat_map(|(key, ids)| ids.into_iter().map(move |rid| (key.clone(), rid)))
            .collect();
        if !ascending {
            out.reverse();
        }
        Ok(out)
    }

    /// Number of (key, record) associations, as seen by `op`.
    #[must_use]
    pub fn size(&self, op: &AtomicOperation) -> usize {
        let entries = self.entries.read();
        let mut size = entries.count_at(op.snapshot());
        if let Some(changes) = op.changes_for(&self.name) {
            for (_, by_record) in changes.iter() {
                for change in by_record.values() {
                    match change.op {
                        StagedOp::Put => size += 1,
                        StagedOp::Remove => size = size.saturating_sub(1),
                    }
                }
            }
        }
        size
    }

    /// Number of associations as of the latest commit.
    #[must_use]
    pub fn committed_size(&self) -> usize {
        self.entries.read().latest_count()
    }

    /// Committed entries at `seq` overlaid with the staged changes of `op`,
    /// restricted to `range` when given.
    fn merged_view(
        &self,
        op: &AtomicOperation,
        range: Option<&IndexRange>,
    ) -> BTreeMap<IndexKey, BTreeSet<RecordId>> {
        let entries = self.entries.read();
        let seq = op.snapshot();
        let mut view: BTreeMap<IndexKey, BTreeSet<RecordId>> = BTreeMap::new();
        let committed = match range {
            Some(range) => entries.range(range),
            None => Some(entries.iter()),
        };
        for (key, postings) in committed.into_iter().flatten() {
            let ids: BTreeSet<_> = postings.visible_at(seq).collect();
            if !ids.is_empty() {
                view.insert(key.clone(), ids);
            }
        }
        if let Some(changes) = op.changes_for(&self.name) {
            for (key, _) in changes.iter() {
                if range.is_some_and(|r| !r.contains(key)) {
                    continue;
                }
                let ids = view.entry(key.clone()).or_default();
                overlay(ids, changes, key);
                if ids.is_empty() {
                    view.remove(key);
                }
            }
        }
        view
    }

    /// Fails if `changes` were computed before the latest rebuild.
    pub(crate) fn check_generation(&self, changes: &IndexChanges) -> CoreResult<()> {
        if changes.generation() != self.generation() {
            return Err(CoreError::rollback(format!(
                "index '{}' was rebuilt while the transaction was running",
                self.name
            )));
        }
        Ok(())
    }

    /// Fails if committing `changes` would leave a key of a unique index
    /// with more than one record.
    ///
    /// Judged against the latest committed state, so a concurrent commit
    /// that took the same key after this transaction's snapshot is seen.
    pub(crate) fn check_unique(&self, changes: &IndexChanges) -> CoreResult<()> {
        if !self.index_type().is_unique() {
            return Ok(());
        }
        let entries = self.entries.read();
        for (key, by_record) in changes.iter() {
            let puts: Vec<RecordId> = by_record
                .iter()
                .filter(|(_, c)| c.op == StagedOp::Put)
                .map(|(rid, _)| *rid)
                .collect();
            if puts.is_empty() {
                continue;
            }
            let mut ids = entries.latest_identities(key);
            overlay(&mut ids, changes, key);
            if ids.len() > 1 {
                let offending = puts[0];
                let existing = ids.iter().copied().find(|rid| *rid != offending).unwrap_or(offending);
                return Err(CoreError::UniquenessViolation {
                    index: self.name.clone(),
                    key: key.to_string(),
                    existing,
                    offending,
                });
            }
        }
        Ok(())
    }

    /// Applies staged changes at commit `seq`. Only called inside the
    /// commit critical section after validation.
    pub(crate) fn merge(&self, changes: &IndexChanges, seq: SequenceNumber) -> usize {
        let mut entries = self.entries.write();
        let mut applied = 0;
        for (key, rid, op) in changes.in_stamp_order() {
            let changed = match op {
                StagedOp::Put => entries.insert_at(key.clone(), rid, seq),
                StagedOp::Remove => entries.remove_at(key, rid, seq),
            };
            applied += usize::from(changed);
        }
        applied
    }

    /// Rebuilds every entry from committed record histories and moves the
    /// index to `generation`.
    ///
    /// Each history is replayed oldest first, so the rebuilt lifespans
    /// serve every snapshot the histories still cover.
    pub(crate) fn rebuild(
        &self,
        histories: &[(RecordId, VersionChain)],
        generation: u64,
    ) -> CoreResult<usize> {
        let definition = self.definition.read();
        let mut store = storage::new_store(definition.index_type().is_hash());
        for (rid, history) in histories {
            let mut previous = BTreeSet::new();
            for version in history.iter_oldest_first() {
                let current = match &version.data {
                    Some(data) => definition.keys_for(data.as_ref())?,
                    None => BTreeSet::new(),
                };
                for key in previous.difference(&current) {
                    store.remove_at(key, *rid, version.seq);
                }
                for key in current.difference(&previous) {
                    store.insert_at(key.clone(), *rid, version.seq);
                }
                previous = current;
            }
        }
        let size = store.latest_count();
        *self.entries.write() = store;
        self.generation.store(generation, Ordering::Release);
        tracing::info!(index = %self.name, entries = size, "index rebuilt");
        Ok(size)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn registered_at(&self) -> u64 {
        self.registered_at.load(Ordering::Acquire)
    }

    pub(crate) fn mark_registered(&self, epoch: u64) {
        self.registered_at.store(epoch, Ordering::Release);
    }

    pub(crate) fn set_collation(&self, path: &str, collation: Collation) -> CoreResult<()> {
        self.definition.write().set_collation(path, collation)
    }

    pub(crate) fn definition_guard(&self) -> parking_lot::RwLockReadGuard<'_, IndexDefinition> {
        self.definition.read()
    }

    pub(crate) fn cleanup(&self, horizon: SequenceNumber) -> usize {
        self.entries.write().cleanup(horizon)
    }
}

/// Applies the staged changes for `key` to a set of identities.
fn overlay(ids: &mut BTreeSet<RecordId>, changes: &IndexChanges, key: &IndexKey) {
    if let Some(by_record) = changes.get(key) {
        for (rid, change) in by_record {
            match change.op {
                StagedOp::Put => {
                    ids.insert(*rid);
                }
                StagedOp::Remove => {
                    ids.remove(rid);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, TransactionId};
    use crate::value::{PropertyType, Value};

    fn rid(pos: u64) -> RecordId {
        RecordId::new(CollectionId::new(1), pos)
    }

    fn index(index_type: IndexType) -> Index {
        Index::new(
            IndexDefinition::new(
                "Person.name",
                "Person",
                IndexKind::Property(
                    IndexField::new("name", PropertyType::String).with_collation(Collation::CaseInsensitive),
                ),
                index_type,
            )
            .unwrap(),
        )
    }

    fn op(snapshot: u64) -> AtomicOperation {
        AtomicOperation::new(TransactionId::new(snapshot + 1), SequenceNumber::new(snapshot))
    }

    fn commit(index: &Index, op: &AtomicOperation, seq: u64) {
        if let Some(changes) = op.changes_for(index.name()) {
            index.merge(changes, SequenceNumber::new(seq));
        }
    }

    #[test]
    fn reads_overlay_own_staged_changes() {
        let idx = index(IndexType::NotUnique);
        let mut mine = op(0);
        let other = op(0);
        idx.put(&mut mine, &IndexKey::single("Ann"), rid(1)).unwrap();

        assert_eq!(idx.get_identities(&mine, &IndexKey::single("ANN")).unwrap(), vec![rid(1)]);
        assert!(idx.get_identities(&other, &IndexKey::single("ann")).unwrap().is_empty());
        assert_eq!(idx.size(&mine), 1);
        assert_eq!(idx.size(&other), 0);
    }

    #[test]
    fn committed_changes_respect_snapshots() {
        let idx = index(IndexType::NotUnique);
        let mut writer = op(0);
        idx.put(&mut writer, &IndexKey::single("bob"), rid(2)).unwrap();
        let old_reader = op(0);
        commit(&idx, &writer, 1);
        let new_reader = op(1);

        assert!(idx.stream_keys(&old_reader).is_empty());
        assert_eq!(idx.stream_keys(&new_reader), vec![IndexKey::single("bob")]);
    }

    #[test]
    fn remove_then_reput_cancels() {
        let idx = index(IndexType::NotUnique);
        let mut setup = op(0);
        idx.put(&mut setup, &IndexKey::single("x"), rid(1)).unwrap();
        commit(&idx, &setup, 1);

        let mut tx = op(1);
        idx.remove(&mut tx, &IndexKey::single("x"), rid(1)).unwrap();
        assert!(idx.get_identities(&tx, &IndexKey::single("x")).unwrap().is_empty());
        idx.put(&mut tx, &IndexKey::single("x"), rid(1)).unwrap();
        assert!(tx.is_empty());
    }

    #[test]
    fn unique_check_uses_net_state() {
        let idx = index(IndexType::Unique);
        let mut setup = op(0);
        idx.put(&mut setup, &IndexKey::single("a"), rid(1)).unwrap();
        idx.put(&mut setup, &IndexKey::single("b"), rid(2)).unwrap();
        commit(&idx, &setup, 1);

        let mut swap = op(1);
        idx.remove(&mut swap, &IndexKey::single("a"), rid(1)).unwrap();
        idx.put(&mut swap, &IndexKey::single("a"), rid(2)).unwrap();
        idx.remove(&mut swap, &IndexKey::single("b"), rid(2)).unwrap();
        idx.put(&mut swap, &IndexKey::single("b"), rid(1)).unwrap();
        assert!(idx.check_unique(swap.changes_for(idx.name()).unwrap()).is_ok());

        let mut dup = op(1);
        idx.put(&mut dup, &IndexKey::single("a"), rid(3)).unwrap();
        let err = idx.check_unique(dup.changes_for(idx.name()).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UniquenessViolation { existing, offending, .. } if existing == rid(1) && offending == rid(3)
        ));
    }

    #[test]
    fn range_on_hash_index_is_unsupported() {
        let idx = index(IndexType::NotUniqueHash);
        let err = idx.range(&op(0), &IndexRange::all(), true).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedQuery { .. }));
    }

    #[test]
    fn hash_index_streams_keys_in_order() {
        let idx = index(IndexType::NotUniqueHash);
        let mut tx = op(0);
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            idx.put(&mut tx, &IndexKey::single(*name), rid(i as u64)).unwrap();
        }
        commit(&idx, &tx, 1);
        let keys = idx.stream_keys(&op(1));
        assert_eq!(keys, ["a", "b", "c"].map(IndexKey::single).to_vec());
    }

    #[test]
    fn case_insensitive_between_orders_folded_bounds() {
        let idx = index(IndexType::NotUnique);
        let mut tx = op(0);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            idx.put(&mut tx, &IndexKey::single(*name), rid(i as u64)).unwrap();
        }
        commit(&idx, &tx, 1);
        let reader = op(1);
        let keys = |range: &IndexRange| -> Vec<IndexKey> {
            idx.range(&reader, range, true)
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect()
        };
        let expected = ["b", "c"].map(IndexKey::single).to_vec();

        let b = KeyBound::inclusive(IndexKey::single("b"));
        let upper_c = KeyBound::inclusive(IndexKey::single("C"));
        assert_eq!(keys(&IndexRange::between(b.clone(), upper_c.clone())), expected);
        assert_eq!(keys(&IndexRange::between(upper_c, b)), expected);

        let conditions = IndexRange::from_conditions(&[
            KeyCondition::new(ConditionOp::Ge, Value::from("C")),
            KeyCondition::new(ConditionOp::Ge, Value::from("b")),
        ]);
        assert_eq!(keys(&conditions), ["c", "d"].map(IndexKey::single).to_vec());
    }

    #[test]
    fn descending_range_with_staged_entries() {
        let idx = index(IndexType::NotUnique);
        let mut tx = op(0);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            idx.put(&mut tx, &IndexKey::single(*name), rid(i as u64)).unwrap();
        }
        commit(&idx, &tx, 1);
        let mut tx = op(1);
        idx.put(&mut tx, &IndexKey::single("bb"), rid(9)).unwrap();
        let range = IndexRange::between(
            KeyBound::inclusive(IndexKey::single("B")),
            KeyBound::exclusive(IndexKey::single("d")),
        );
        let keys: Vec<_> = idx
            .range(&tx, &range, false)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["c", "bb", "b"].map(IndexKey::single).to_vec());
    }
}
