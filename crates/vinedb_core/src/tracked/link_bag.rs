//! Hybrid multiset of record references.

use super::{ChangeEvent, ChangeKind, EventKey, Tracker};
use crate::types::RecordId;
use std::collections::BTreeMap;
use std::fmt;

/// Default number of entries above which a bag switches to the tree layout.
pub const DEFAULT_TREE_THRESHOLD: usize = 40;

/// One slot of a [`LinkBag`].
///
/// A lightweight entry holds a single identity. A paired entry holds a
/// primary identity (for example a graph edge) and a secondary one (the
/// vertex on its far side); both halves are indexed and they are always
/// added and removed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkBagEntry {
    primary: RecordId,
    secondary: Option<RecordId>,
}

impl LinkBagEntry {
    /// Creates a single-identity entry.
    #[must_use]
    pub const fn lightweight(rid: RecordId) -> Self {
        Self {
            primary: rid,
            secondary: None,
        }
    }

    /// Creates a primary + secondary entry.
    #[must_use]
    pub const fn paired(primary: RecordId, secondary: RecordId) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// Returns the primary identity.
    #[must_use]
    pub const fn primary(&self) -> RecordId {
        self.primary
    }

    /// Returns the secondary identity of a paired entry.
    #[must_use]
    pub const fn secondary(&self) -> Option<RecordId> {
        self.secondary
    }

    /// Returns true for primary + secondary entries.
    #[must_use]
    pub const fn is_paired(&self) -> bool {
        self.secondary.is_some()
    }

    /// Every identity held by this entry, primary first.
    pub fn links(&self) -> impl Iterator<Item = RecordId> {
        std::iter::once(self.primary).chain(self.secondary)
    }
}

impl fmt::Display for LinkBagEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secondary {
            Some(secondary) => write!(f, "{}->{}", self.primary, secondary),
            None => write!(f, "{}", self.primary),
        }
    }
}

impl From<RecordId> for LinkBagEntry {
    fn from(rid: RecordId) -> Self {
        Self::lightweight(rid)
    }
}

#[derive(Debug, Clone)]
enum Storage {
    /// Insertion-ordered entries, duplicates allowed.
    Embedded(Vec<LinkBagEntry>),
    /// Entry to occurrence count.
    Tree(BTreeMap<LinkBagEntry, usize>),
}

/// A multiset of references optimised for large fan-out.
///
/// Small bags keep their entries in a vector. Once the bag grows past its
/// threshold it moves to an ordered tree keyed by entry, where lookups and
/// removals by primary identity are logarithmic. The layout never changes
/// what the bag contains, how it iterates or which events it records.
#[derive(Debug, Clone)]
pub struct LinkBag {
    storage: Storage,
    len: usize,
    /// Occurrences of each secondary identity.
    secondaries: BTreeMap<RecordId, usize>,
    threshold: usize,
    tracker: Tracker,
}

impl_tracked!(LinkBag);

impl Default for LinkBag {
    fn default() -> Self {
        Self::with_threshold(DEFAULT_TREE_THRESHOLD)
    }
}

impl LinkBag {
    /// Creates an empty, detached bag with the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bag that switches to the tree layout above
    /// `threshold` entries.
    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            storage: Storage::Embedded(Vec::new()),
            len: 0,
            secondaries: BTreeMap::new(),
            threshold,
            tracker: Tracker::default(),
        }
    }

    /// Number of entries, counting repeats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true while the bag uses the embedded layout.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        matches!(self.storage, Storage::Embedded(_))
    }

    /// Returns true if some entry has this primary identity.
    #[must_use]
    pub fn contains(&self, primary: RecordId) -> bool {
        self.find_by_primary(primary).is_some()
    }

    /// Returns true if some entry holds `rid` as primary or secondary.
    #[must_use]
    pub fn references(&self, rid: RecordId) -> bool {
        self.secondaries.contains_key(&rid) || self.contains(rid)
    }

    /// Iterates over entries, repeats included.
    pub fn iter(&self) -> Box<dyn Iterator<Item = LinkBagEntry> + '_> {
        match &self.storage {
            Storage::Embedded(entries) => Box::new(entries.iter().copied()),
            Storage::Tree(tree) => Box::new(
                tree.iter()
                    .flat_map(|(entry, count)| std::iter::repeat(*entry).take(*count)),
            ),
        }
    }

    /// Entries in sorted order, used for comparing bags.
    #[must_use]
    pub fn sorted_entries(&self) -> Vec<LinkBagEntry> {
        let mut entries: Vec<_> = self.iter().collect();
        if self.is_embedded() {
            entries.sort_unstable();
        }
        entries
    }

    /// Adds a single-identity entry.
    pub fn add(&mut self, rid: RecordId) {
        self.add_entry(LinkBagEntry::lightweight(rid));
    }

    /// Adds a primary + secondary entry.
    pub fn add_pair(&mut self, primary: RecordId, secondary: RecordId) {
        self.add_entry(LinkBagEntry::paired(primary, secondary));
    }

    /// Adds an entry.
    pub fn add_entry(&mut self, entry: LinkBagEntry) {
        self.insert_raw(entry);
        self.tracker
            .record(ChangeEvent::add(EventKey::Entry(entry), None));
    }

    /// Removes one occurrence of the entry whose primary identity is
    /// `primary`, returning it. Both halves of a paired entry go together.
    pub fn remove(&mut self, primary: RecordId) -> Option<LinkBagEntry> {
        let entry = self.find_by_primary(primary)?;
        self.remove_raw(&entry);
        self.tracker
            .record(ChangeEvent::remove(EventKey::Entry(entry), None));
        Some(entry)
    }

    /// Removes one occurrence of exactly this entry.
    pub fn remove_entry(&mut self, entry: &LinkBagEntry) -> bool {
        if !self.remove_raw(entry) {
            return false;
        }
        self.tracker
            .record(ChangeEvent::remove(EventKey::Entry(*entry), None));
        true
    }

    /// Removes every entry, one REMOVE event per occurrence.
    pub fn clear(&mut self) {
        let entries: Vec<_> = self.iter().collect();
        self.storage = Storage::Embedded(Vec::new());
        self.len = 0;
        self.secondaries.clear();
        for entry in entries {
            self.tracker
                .record(ChangeEvent::remove(EventKey::Entry(entry), None));
        }
    }

    fn find_by_primary(&self, primary: RecordId) -> Option<LinkBagEntry> {
        match &self.storage {
            Storage::Embedded(entries) => entries.iter().find(|e| e.primary == primary).copied(),
            Storage::Tree(tree) => tree
                .range(LinkBagEntry::lightweight(primary)..)
                .next()
                .map(|(entry, _)| *entry)
                .filter(|entry| entry.primary == primary),
        }
    }

    /// Reverts one recorded event without recording anything.
    pub(crate) fn undo(&mut self, event: &ChangeEvent) {
        let EventKey::Entry(entry) = event.key() else {
            return;
        };
        match event.kind() {
            ChangeKind::Add => {
                self.remove_raw(entry);
            }
            ChangeKind::Remove => self.insert_raw(*entry),
            ChangeKind::Update => {}
        }
    }

    fn insert_raw(&mut self, entry: LinkBagEntry) {
        match &mut self.storage {
            Storage::Embedded(entries) => entries.push(entry),
            Storage::Tree(tree) => *tree.entry(entry).or_insert(0) += 1,
        }
        if let Some(secondary) = entry.secondary {
            *self.secondaries.entry(secondary).or_insert(0) += 1;
        }
        self.len += 1;
        if self.len > self.threshold && self.is_embedded() {
            self.convert_to_tree();
        }
    }

    fn remove_raw(&mut self, entry: &LinkBagEntry) -> bool {
        let removed = match &mut self.storage {
            Storage::Embedded(entries) => match entries.iter().position(|e| e == entry) {
                Some(pos) => {
                    entries.remove(pos);
                    true
                }
                None => false,
            },
            Storage::Tree(tree) => match tree.get_mut(entry) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    true
                }
                Some(_) => {
                    tree.remove(entry);
                    true
                }
                None => false,
            },
        };
        if removed {
            self.len -= 1;
            if let Some(secondary) = entry.secondary {
                if let Some(count) = self.secondaries.get_mut(&secondary) {
                    *count -= 1;
                    if *count == 0 {
                        self.secondaries.remove(&secondary);
                    }
                }
            }
        }
        removed
    }

    fn convert_to_tree(&mut self) {
        if let Storage::Embedded(entries) = &self.storage {
            let mut tree = BTreeMap::new();
            for entry in entries {
                *tree.entry(*entry).or_insert(0) += 1;
            }
            self.storage = Storage::Tree(tree);
        }
    }
}

impl PartialEq for LinkBag {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.sorted_entries() == other.sorted_entries()
    }
}

impl Eq for LinkBag {}

impl FromIterator<LinkBagEntry> for LinkBag {
    fn from_iter<I: IntoIterator<Item = LinkBagEntry>>(iter: I) -> Self {
        let mut bag = LinkBag::new();
        for entry in iter {
            bag.insert_raw(entry);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracked::{ChangeKind, OwnerLink, Tracked};
    use crate::types::CollectionId;

    fn rid(pos: u64) -> RecordId {
        RecordId::new(CollectionId::new(9), pos)
    }

    #[test]
    fn paired_entry_exposes_both_links() {
        let entry = LinkBagEntry::paired(rid(1), rid(2));
        assert_eq!(entry.links().collect::<Vec<_>>(), vec![rid(1), rid(2)]);
        assert_eq!(LinkBagEntry::lightweight(rid(3)).links().count(), 1);
    }

    #[test]
    fn remove_by_primary_takes_whole_pair() {
        let mut bag = LinkBag::new();
        bag.add(rid(1));
        bag.add_pair(rid(2), rid(3));
        let removed = bag.remove(rid(2)).unwrap();
        assert_eq!(removed.secondary(), Some(rid(3)));
        assert_eq!(bag.len(), 1);
        assert!(!bag.references(rid(3)));
    }

    #[test]
    fn converts_to_tree_above_threshold() {
        let mut bag = LinkBag::with_threshold(5);
        for i in 0..5 {
            bag.add(rid(i));
        }
        assert!(bag.is_embedded());
        bag.add(rid(5));
        assert!(!bag.is_embedded());
        bag.add(rid(5));
        assert_eq!(bag.len(), 7);
        assert!(bag.contains(rid(5)));
        assert_eq!(bag.remove(rid(5)), Some(LinkBagEntry::lightweight(rid(5))));
        assert!(bag.contains(rid(5)));
        assert_eq!(bag.len(), 6);
    }

    #[test]
    fn layout_does_not_affect_equality() {
        let mut small = LinkBag::new();
        let mut tree = LinkBag::with_threshold(0);
        for i in [3, 1, 2, 1] {
            small.add(rid(i));
            tree.add(rid(i));
        }
        assert!(small.is_embedded());
        assert!(!tree.is_embedded());
        assert_eq!(small, tree);
    }

    #[test]
    fn events_carry_entries() {
        let mut bag = LinkBag::new();
        bag.tracker_mut().start_tracking(OwnerLink {
            record: rid(100),
            property: "out".into(),
        });
        bag.add_pair(rid(1), rid(2));
        bag.remove(rid(1));
        let events = bag.change_timeline().unwrap().events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), ChangeKind::Add);
        assert_eq!(
            events[1].key(),
            &EventKey::Entry(LinkBagEntry::paired(rid(1), rid(2)))
        );
    }

    #[test]
    fn secondary_references_survive_the_tree_layout() {
        let mut bag = LinkBag::with_threshold(2);
        bag.add_pair(rid(1), rid(50));
        bag.add_pair(rid(2), rid(50));
        bag.add(rid(3));
        assert!(!bag.is_embedded());
        bag.remove(rid(1));
        assert!(bag.references(rid(50)));
        bag.remove(rid(2));
        assert!(!bag.references(rid(50)));
        assert!(bag.references(rid(3)));
    }
}
