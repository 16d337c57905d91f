//! Committed index entries with MVCC lifespans.
//!
//! Every (key, record) association carries the commit sequences at which
//! it became visible and, once removed, stopped being visible. A snapshot
//! at sequence `s` sees an association whose lifespan contains `s`.

use super::key::{IndexKey, IndexRange};
use crate::types::{RecordId, SequenceNumber};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Interval of commit sequences during which an association is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifespan {
    created: SequenceNumber,
    removed: Option<SequenceNumber>,
}

impl Lifespan {
    fn visible_at(&self, seq: SequenceNumber) -> bool {
        self.created <= seq && self.removed.map_or(true, |r| r > seq)
    }

    fn is_open(&self) -> bool {
        self.removed.is_none()
    }
}

/// Records associated with one key.
#[derive(Debug, Clone, Default)]
pub(crate) struct Postings {
    by_record: BTreeMap<RecordId, Vec<Lifespan>>,
}

impl Postings {
    pub fn visible_at(&self, seq: SequenceNumber) -> impl Iterator<Item = RecordId> + '_ {
        self.by_record
            .iter()
            .filter(move |(_, spans)| spans.iter().any(|s| s.visible_at(seq)))
            .map(|(rid, _)| *rid)
    }

    pub fn is_visible(&self, rid: RecordId, seq: SequenceNumber) -> bool {
        self.by_record
            .get(&rid)
            .is_some_and(|spans| spans.iter().any(|s| s.visible_at(seq)))
    }

    /// Records associated as of the latest commit.
    pub fn latest(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.by_record
            .iter()
            .filter(|(_, spans)| spans.iter().any(Lifespan::is_open))
            .map(|(rid, _)| *rid)
    }

    fn open(&mut self, rid: RecordId, seq: SequenceNumber) -> bool {
        let spans = self.by_record.entry(rid).or_default();
        if spans.iter().any(Lifespan::is_open) {
            return false;
        }
        spans.push(Lifespan {
            created: seq,
            removed: None,
        });
        true
    }

    fn close(&mut self, rid: RecordId, seq: SequenceNumber) -> bool {
        let Some(spans) = self.by_record.get_mut(&rid) else {
            return false;
        };
        let Some(span) = spans.iter_mut().find(|s| s.is_open()) else {
            return false;
        };
        span.removed = Some(seq);
        spans.retain(|s| s.removed != Some(s.created));
        true
    }

    /// Drops lifespans that ended at or before `horizon`.
    fn cleanup(&mut self, horizon: SequenceNumber) -> usize {
        let mut dropped = 0;
        self.by_record.retain(|_, spans| {
            let before = spans.len();
            spans.retain(|s| s.removed.map_or(true, |r| r > horizon));
            dropped += before - spans.len();
            !spans.is_empty()
        });
        dropped
    }

    fn is_empty(&self) -> bool {
        self.by_record.is_empty()
    }
}

/// Key to postings map behind an index.
///
/// Ordered stores answer range scans; hashed stores only point lookups.
pub(crate) trait EntryStore: Send + Sync + fmt::Debug {
    /// Postings of `key`.
    fn postings(&self, key: &IndexKey) -> Option<&Postings>;

    /// Mutable postings of `key`.
    fn postings_mut(&mut self, key: &IndexKey) -> Option<&mut Postings>;

    /// Postings of `key`, created if absent.
    fn postings_entry(&mut self, key: IndexKey) -> &mut Postings;

    /// Every key with its postings, in key order for ordered stores.
    fn iter(&self) -> Box<dyn Iterator<Item = (&IndexKey, &Postings)> + '_>;

    /// Keys in `range`, ascending. `None` if the store is not ordered.
    fn range<'a>(
        &'a self,
        range: &'a IndexRange,
    ) -> Option<Box<dyn Iterator<Item = (&'a IndexKey, &'a Postings)> + 'a>>;

    /// Drops keys for which `keep` returns false.
    fn retain(&mut self, keep: &mut dyn FnMut(&IndexKey, &mut Postings) -> bool);

    /// Opens an association at commit `seq`. No-op if already open.
    fn insert_at(&mut self, key: IndexKey, rid: RecordId, seq: SequenceNumber) -> bool {
        self.postings_entry(key).open(rid, seq)
    }

    /// Closes an association at commit `seq`. No-op if not open.
    fn remove_at(&mut self, key: &IndexKey, rid: RecordId, seq: SequenceNumber) -> bool {
        self.postings_mut(key).is_some_and(|p| p.close(rid, seq))
    }

    /// Records associated with `key` at `seq`.
    fn identities_at(&self, key: &IndexKey, seq: SequenceNumber) -> BTreeSet<RecordId> {
        self.postings(key)
            .map(|p| p.visible_at(seq).collect())
            .unwrap_or_default()
    }

    /// Records associated with `key` as of the latest commit.
    fn latest_identities(&self, key: &IndexKey) -> BTreeSet<RecordId> {
        self.postings(key)
            .map(|p| p.latest().collect())
            .unwrap_or_default()
    }

    /// Returns true if (`key`, `rid`) is visible at `seq`.
    fn is_visible(&self, key: &IndexKey, rid: RecordId, seq: SequenceNumber) -> bool {
        self.postings(key).is_some_and(|p| p.is_visible(rid, seq))
    }

    /// Number of associations visible at `seq`.
    fn count_at(&self, seq: SequenceNumber) -> usize {
        self.iter().map(|(_, p)| p.visible_at(seq).count()).sum()
    }

    /// Number of associations as of the latest commit.
    fn latest_count(&self) -> usize {
        self.iter().map(|(_, p)| p.latest().count()).sum()
    }

    /// Drops lifespans no snapshot at or after `horizon` can see.
    fn cleanup(&mut self, horizon: SequenceNumber) -> usize {
        let mut dropped = 0;
        self.retain(&mut |_, postings| {
            dropped += postings.cleanup(horizon);
            !postings.is_empty()
        });
        dropped
    }
}

/// Creates an empty store for the given layout.
pub(crate) fn new_store(hashed: bool) -> Box<dyn EntryStore> {
    if hashed {
        Box::new(HashedEntries::default())
    } else {
        Box::new(OrderedEntries::default())
    }
}

/// B-tree layout.
#[derive(Debug, Default)]
pub(crate) struct OrderedEntries {
    map: BTreeMap<IndexKey, Postings>,
}

impl EntryStore for OrderedEntries {
    fn postings(&self, key: &IndexKey) -> Option<&Postings> {
        self.map.get(key)
    }

    fn postings_mut(&mut self, key: &IndexKey) -> Option<&mut Postings> {
        self.map.get_mut(key)
    }

    fn postings_entry(&mut self, key: IndexKey) -> &mut Postings {
        self.map.entry(key).or_default()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&IndexKey, &Postings)> + '_> {
        Box::new(self.map.iter())
    }

    fn range<'a>(
        &'a self,
        range: &'a IndexRange,
    ) -> Option<Box<dyn Iterator<Item = (&'a IndexKey, &'a Postings)> + 'a>> {
        // A partial key sorts before every key it prefixes, so it is a valid
        // starting point even for exclusive or prefix bounds.
        let start: Box<dyn Iterator<Item = (&'a IndexKey, &'a Postings)> + 'a> = match &range.lower {
            Some(bound) => Box::new(self.map.range(bound.key.clone()..)),
            None => Box::new(self.map.iter()),
        };
        Some(Box::new(
            start
                .take_while(move |(k, _)| !range.past_upper(k))
                .filter(move |(k, _)| range.above_lower(k)),
        ))
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&IndexKey, &mut Postings) -> bool) {
        self.map.retain(|k, p| keep(k, p));
    }
}

/// Hash layout.
#[derive(Debug, Default)]
pub(crate) struct HashedEntries {
    map: FxHashMap<IndexKey, Postings>,
}

impl EntryStore for HashedEntries {
    fn postings(&self, key: &IndexKey) -> Option<&Postings> {
        self.map.get(key)
    }

    fn postings_mut(&mut self, key: &IndexKey) -> Option<&mut Postings> {
        self.map.get_mut(key)
    }

    fn postings_entry(&mut self, key: IndexKey) -> &mut Postings {
        self.map.entry(key).or_default()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&IndexKey, &Postings)> + '_> {
        Box::new(self.map.iter())
    }

    fn range<'a>(
        &'a self,
        _range: &'a IndexRange,
    ) -> Option<Box<dyn Iterator<Item = (&'a IndexKey, &'a Postings)> + 'a>> {
        None
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&IndexKey, &mut Postings) -> bool) {
        self.map.retain(|k, p| keep(k, p));
    }
}
