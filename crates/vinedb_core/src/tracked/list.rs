//! Tracked ordered list.

use super::{ChangeEvent, ChangeKind, EventKey, Tracker};
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// An ordered list of values that records its mutations.
///
/// Events: `ADD(position, value)`, `UPDATE(position, new, old)`,
/// `REMOVE(position, old)`.
#[derive(Debug, Clone, Default)]
pub struct TrackedList {
    items: Vec<Value>,
    tracker: Tracker,
}

impl_tracked!(TrackedList);

impl TrackedList {
    /// Creates an empty, detached list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached list holding `values`.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: values.into_iter().collect(),
            tracker: Tracker::default(),
        }
    }

    /// Returns the elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Returns true if an equal element is present.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    /// Appends an element.
    pub fn push(&mut self, value: impl Into<Value>) {
        let value = value.into();
        let position = self.items.len();
        self.items.push(value.clone());
        self.tracker
            .record(ChangeEvent::add(EventKey::Position(position), Some(value)));
    }

    /// Appends without recording an event.
    ///
    /// Used when materialising a list whose contents are already reflected
    /// in every index.
    pub fn add_untracked(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
    }

    /// Inserts an element at `index`, shifting later elements.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        if index > self.items.len() {
            return Err(out_of_bounds(index, self.items.len()));
        }
        let value = value.into();
        self.items.insert(index, value.clone());
        self.tracker
            .record(ChangeEvent::add(EventKey::Position(index), Some(value)));
        Ok(())
    }

    /// Replaces the element at `index`, returning the previous one.
    ///
    /// Replacing an element with an equal value records nothing.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> CoreResult<Value> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or_else(|| out_of_bounds(index, len))?;
        let value = value.into();
        if *slot == value {
            return Ok(value);
        }
        let old = std::mem::replace(slot, value.clone());
        self.tracker.record(ChangeEvent::update(
            EventKey::Position(index),
            value,
            old.clone(),
        ));
        Ok(old)
    }

    /// Removes and returns the element at `index`.
    pub fn remove_at(&mut self, index: usize) -> CoreResult<Value> {
        if index >= self.items.len() {
            return Err(out_of_bounds(index, self.items.len()));
        }
        let old = self.items.remove(index);
        self.tracker.record(ChangeEvent::remove(
            EventKey::Position(index),
            Some(old.clone()),
        ));
        Ok(old)
    }

    /// Removes the first element equal to `value`.
    pub fn remove_value(&mut self, value: &Value) -> bool {
        match self.items.iter().position(|v| v == value) {
            Some(index) => {
                let old = self.items.remove(index);
                self.tracker
                    .record(ChangeEvent::remove(EventKey::Position(index), Some(old)));
                true
            }
            None => false,
        }
    }

    /// Removes every element, one REMOVE event per element.
    pub fn clear(&mut self) {
        while let Some(old) = self.items.pop() {
            let position = self.items.len();
            self.tracker
                .record(ChangeEvent::remove(EventKey::Position(position), Some(old)));
        }
    }

    /// Keeps only the elements matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Value) -> bool) {
        let mut index = 0;
        while index < self.items.len() {
            if keep(&self.items[index]) {
                index += 1;
            } else {
                let old = self.items.remove(index);
                self.tracker
                    .record(ChangeEvent::remove(EventKey::Position(index), Some(old)));
            }
        }
    }
}

impl TrackedList {
    /// Reverts one recorded event without recording anything.
    pub(crate) fn undo(&mut self, event: &ChangeEvent) {
        let EventKey::Position(position) = *event.key() else {
            return;
        };
        match (event.kind(), event.old_value()) {
            (ChangeKind::Add, _) if position < self.items.len() => {
                self.items.remove(position);
            }
            (ChangeKind::Remove, Some(old)) if position <= self.items.len() => {
                self.items.insert(position, old.clone());
            }
            (ChangeKind::Update, Some(old)) => {
                if let Some(slot) = self.items.get_mut(position) {
                    *slot = old.clone();
                }
            }
            _ => {}
        }
    }
}

fn out_of_bounds(index: usize, len: usize) -> CoreError {
    CoreError::invalid_operation(format!("list index {index} out of bounds (len {len})"))
}

impl PartialEq for TrackedList {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for TrackedList {}

impl<'a> IntoIterator for &'a TrackedList {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for TrackedList {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().map(Into::into))
    }
}
