//! Tracked string-keyed map.

use super::{ChangeEvent, ChangeKind, EventKey, Tracker};
use crate::value::Value;
use std::collections::BTreeMap;

/// A string-keyed map that records its mutations.
///
/// Events: `ADD(key, value)`, `UPDATE(key, new, old)`, `REMOVE(key, old)`.
#[derive(Debug, Clone, Default)]
pub struct TrackedMap {
    entries: BTreeMap<String, Value>,
    tracker: Tracker,
}

impl_tracked!(TrackedMap);

impl TrackedMap {
    /// Creates an empty, detached map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached map holding `entries`.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            tracker: Tracker::default(),
        }
    }

    /// Returns the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns true if some key maps to an equal value.
    #[must_use]
    pub fn contains_value(&self, value: &Value) -> bool {
        self.entries.values().any(|v| v == value)
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Iterates over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Iterates over values in key order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an entry, returning the previous value.
    ///
    /// Replacing a value with an equal one records nothing.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.get_mut(&key) {
            Some(slot) if *slot == value => Some(value),
            Some(slot) => {
                let old = std::mem::replace(slot, value.clone());
                self.tracker
                    .record(ChangeEvent::update(EventKey::Key(key), value, old.clone()));
                Some(old)
            }
            None => {
                self.entries.insert(key.clone(), value.clone());
                self.tracker
                    .record(ChangeEvent::add(EventKey::Key(key), Some(value)));
                None
            }
        }
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.entries.remove(key)?;
        self.tracker.record(ChangeEvent::remove(
            EventKey::Key(key.to_string()),
            Some(old.clone()),
        ));
        Some(old)
    }

    /// Removes every entry, one REMOVE event per entry.
    pub fn clear(&mut self) {
        for (key, old) in std::mem::take(&mut self.entries) {
            self.tracker
                .record(ChangeEvent::remove(EventKey::Key(key), Some(old)));
        }
    }

    /// Reverts one recorded event without recording anything.
    pub(crate) fn undo(&mut self, event: &ChangeEvent) {
        let EventKey::Key(key) = event.key() else {
            return;
        };
        match (event.kind(), event.old_value()) {
            (ChangeKind::Add, _) => {
                self.entries.remove(key);
            }
            (ChangeKind::Remove | ChangeKind::Update, Some(old)) => {
                self.entries.insert(key.clone(), old.clone());
            }
            _ => {}
        }
    }
}

impl PartialEq for TrackedMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for TrackedMap {}

impl<'a> IntoIterator for &'a TrackedMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TrackedMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().map(|(k, v)| (k.into(), v.into())))
    }
}
