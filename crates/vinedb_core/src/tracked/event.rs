//! Change events and timelines.

use super::link_bag::LinkBagEntry;
use crate::value::Value;
use std::collections::BTreeMap;

/// Kind of a container mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// An element, entry or key was added.
    Add,
    /// An element, entry or key was removed.
    Remove,
    /// The value at an existing position or key was replaced.
    Update,
}

/// Where in the container a change happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKey {
    /// List position.
    Position(usize),
    /// Map key.
    Key(String),
    /// Set element (the element is the event value).
    Element,
    /// LinkBag entry.
    Entry(LinkBagEntry),
}

/// One mutation of a tracked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    kind: ChangeKind,
    key: EventKey,
    value: Option<Value>,
    old_value: Option<Value>,
}

impl ChangeEvent {
    pub(crate) fn add(key: EventKey, value: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Add,
            key,
            value,
            old_value: None,
        }
    }

    pub(crate) fn remove(key: EventKey, old_value: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Remove,
            key,
            value: None,
            old_value,
        }
    }

    pub(crate) fn update(key: EventKey, value: Value, old_value: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            key,
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    /// Returns the kind of change.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Returns the position, key, element marker or entry.
    #[must_use]
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Returns the new value (ADD and UPDATE).
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the previous value (REMOVE and UPDATE).
    #[must_use]
    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }
}

/// Ordered, append-only log of the changes made to one property since it
/// was loaded or last checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    events: Vec<ChangeEvent>,
}

impl Timeline {
    pub(crate) fn push(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    /// Returns the events in the order they happened.
    #[must_use]
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Iterates over the events.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeEvent> {
        self.events.iter()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Net effect of the timeline on the container's element multiset.
    ///
    /// An add cancels a pending remove of an equal element and vice versa,
    /// so adding then removing the same element nets to nothing. Map events
    /// count map values; LinkBag events count entries as links.
    #[must_use]
    pub fn net_effect(&self) -> DeltaCounter<Value> {
        let mut counter = DeltaCounter::default();
        for event in &self.events {
            match (&event.key, event.kind) {
                (EventKey::Entry(entry), ChangeKind::Add) => counter.add(Value::Link(entry.primary())),
                (EventKey::Entry(entry), ChangeKind::Remove) => {
                    counter.remove(Value::Link(entry.primary()));
                }
                _ => {
                    if let Some(v) = &event.value {
                        counter.add(v.clone());
                    }
                    if let Some(v) = &event.old_value {
                        counter.remove(v.clone());
                    }
                }
            }
        }
        counter
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a ChangeEvent;
    type IntoIter = std::slice::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Counts additions and removals with cancellation.
///
/// Adding an item first consumes a pending removal of it; removing an
/// item first consumes a pending addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCounter<K: Ord> {
    added: BTreeMap<K, usize>,
    removed: BTreeMap<K, usize>,
}

impl<K: Ord> Default for DeltaCounter<K> {
    fn default() -> Self {
        Self {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }
}

impl<K: Ord> DeltaCounter<K> {
    /// Records an addition.
    pub fn add(&mut self, key: K) {
        if !decrement(&mut self.removed, &key) {
            *self.added.entry(key).or_insert(0) += 1;
        }
    }

    /// Records a removal.
    pub fn remove(&mut self, key: K) {
        if !decrement(&mut self.added, &key) {
            *self.removed.entry(key).or_insert(0) += 1;
        }
    }

    /// Items with a net positive count.
    pub fn added(&self) -> impl Iterator<Item = (&K, usize)> {
        self.added.iter().map(|(k, n)| (k, *n))
    }

    /// Items with a net negative count.
    pub fn removed(&self) -> impl Iterator<Item = (&K, usize)> {
        self.removed.iter().map(|(k, n)| (k, *n))
    }

    /// Returns true when additions and removals cancel out completely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Consumes the counter, returning the net added and removed items.
    pub fn into_parts(self) -> (Vec<K>, Vec<K>) {
        (
            self.added.into_keys().collect(),
            self.removed.into_keys().collect(),
        )
    }
}

fn decrement<K: Ord>(map: &mut BTreeMap<K, usize>, key: &K) -> bool {
    match map.get_mut(key) {
        Some(n) if *n > 1 => {
            *n -= 1;
            true
        }
        Some(_) => {
            map.remove(key);
            true
        }
        None => false,
    }
}
