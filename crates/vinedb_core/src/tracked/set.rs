//! Tracked unordered set.

use super::{ChangeEvent, ChangeKind, EventKey, Tracker};
use crate::value::Value;
use std::collections::BTreeSet;

/// A set of distinct values that records its mutations.
///
/// Events: `ADD(element)` and `REMOVE(element)`; the element travels as the
/// event value.
#[derive(Debug, Clone, Default)]
pub struct TrackedSet {
    items: BTreeSet<Value>,
    tracker: Tracker,
}

impl_tracked!(TrackedSet);

impl TrackedSet {
    /// Creates an empty, detached set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached set holding `values`.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: values.into_iter().collect(),
            tracker: Tracker::default(),
        }
    }

    /// Iterates over the elements in value order.
    pub fn iter(&self) -> std::collections::btree_set::Iter<'_, Value> {
        self.items.iter()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if the element is present.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    /// Adds an element. Returns false (and records nothing) if it was
    /// already present.
    pub fn insert(&mut self, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.items.contains(&value) {
            return false;
        }
        self.items.insert(value.clone());
        self.tracker
            .record(ChangeEvent::add(EventKey::Element, Some(value)));
        true
    }

    /// Removes an element. Returns false if it was absent.
    pub fn remove(&mut self, value: &Value) -> bool {
        match self.items.take(value) {
            Some(old) => {
                self.tracker
                    .record(ChangeEvent::remove(EventKey::Element, Some(old)));
                true
            }
            None => false,
        }
    }

    /// Removes every element, one REMOVE event per element.
    pub fn clear(&mut self) {
        for old in std::mem::take(&mut self.items) {
            self.tracker
                .record(ChangeEvent::remove(EventKey::Element, Some(old)));
        }
    }

    /// Reverts one recorded event without recording anything.
    pub(crate) fn undo(&mut self, event: &ChangeEvent) {
        match (event.kind(), event.value(), event.old_value()) {
            (ChangeKind::Add, Some(value), _) => {
                self.items.remove(value);
            }
            (ChangeKind::Remove, _, Some(old)) => {
                self.items.insert(old.clone());
            }
            _ => {}
        }
    }
}

impl PartialEq for TrackedSet {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for TrackedSet {}

impl<'a> IntoIterator for &'a TrackedSet {
    type Item = &'a Value;
    type IntoIter = std::collections::btree_set::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for TrackedSet {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracked::{ChangeKind, OwnerLink, Tracked};
    use crate::types::{CollectionId, RecordId};

    fn attached() -> TrackedSet {
        let mut set = TrackedSet::new();
        set.tracker_mut().start_tracking(OwnerLink {
            record: RecordId::new(CollectionId::new(1), 0),
            property: "tags".into(),
        });
        set
    }

    #[test]
    fn duplicate_insert_is_silent() {
        let mut set = attached();
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.change_timeline().unwrap().len(), 1);
    }

    #[test]
    fn remove_records_element() {
        let mut set = attached();
        set.insert("a");
        assert!(set.remove(&Value::from("a")));
        assert!(!set.remove(&Value::from("a")));
        let events = set.change_timeline().unwrap().events();
        assert_eq!(events[1].kind(), ChangeKind::Remove);
        assert_eq!(events[1].old_value(), Some(&Value::from("a")));
    }

    #[test]
    fn add_then_remove_nets_to_nothing() {
        let mut set = attached();
        set.insert(7);
        set.remove(&Value::Integer(7));
        assert!(set.change_timeline().unwrap().net_effect().is_empty());
    }
}
