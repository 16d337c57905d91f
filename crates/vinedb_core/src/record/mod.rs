//! Records and their in-transaction working copies.
//!
//! A [`Record`] is what a transaction hands out from `load` or `new_record`:
//! a private, mutable copy of the committed property map. It tracks which
//! properties were touched since the last checkpoint, keeps the property
//! values as they were at that checkpoint (the values the indexes currently
//! reflect), and attaches every container property to itself so that
//! container mutations land on a timeline.

mod store;

pub(crate) use store::{RecordStore, RecordVersion, VersionChain};

use crate::error::{CoreError, CoreResult};
use crate::tracked::{
    self, LinkBag, OwnerLink, Timeline, TrackedList, TrackedMap, TrackedSet, DEFAULT_TREE_THRESHOLD,
};
use crate::types::RecordId;
use crate::value::{PropertyMap, Value};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Read access to a set of named property values.
///
/// Index definitions derive keys from any source implementing this, which
/// lets the maintenance engine evaluate a definition against the current
/// properties and against the last checkpoint alike.
pub trait PropertySource {
    /// Returns the value of a top-level property.
    fn property(&self, name: &str) -> Option<&Value>;
}

impl PropertySource for PropertyMap {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// A record as seen by one transaction.
#[derive(Debug)]
pub struct Record {
    id: RecordId,
    class: Arc<str>,
    /// Committed version observed when the record was first touched.
    version: u64,
    properties: PropertyMap,
    /// Committed properties at the transaction snapshot.
    base: Arc<PropertyMap>,
    /// Values at the last checkpoint of properties touched since load.
    /// `None` means the property was absent.
    checkpoint: BTreeMap<String, Option<Value>>,
    /// Containers whose checkpoint value is the current instance with its
    /// timeline undone. They are not copied at checkpoint time.
    rewound: BTreeSet<String>,
    dirty_properties: BTreeSet<String>,
    removed_properties: BTreeSet<String>,
    dirty: bool,
    modified: bool,
    deleted: bool,
    is_new: bool,
    flushed: bool,
    /// Schema epoch of the first flush. Indexes registered after it never
    /// saw the changes that flush checkpointed.
    flushed_at: Option<u64>,
    link_bag_threshold: usize,
}

impl Record {
    /// Creates a new, never committed record.
    pub(crate) fn new(id: RecordId, class: Arc<str>) -> Self {
        Self {
            id,
            class,
            version: 0,
            properties: PropertyMap::new(),
            base: Arc::new(PropertyMap::new()),
            checkpoint: BTreeMap::new(),
            rewound: BTreeSet::new(),
            dirty_properties: BTreeSet::new(),
            removed_properties: BTreeSet::new(),
            dirty: true,
            modified: true,
            deleted: false,
            is_new: true,
            flushed: false,
            flushed_at: None,
            link_bag_threshold: DEFAULT_TREE_THRESHOLD,
        }
    }

    /// Materialises a committed record as a working copy.
    ///
    /// Container properties are cloned (which detaches them) and attached to
    /// this record with empty timelines.
    pub(crate) fn from_committed(
        id: RecordId,
        class: Arc<str>,
        version: u64,
        base: Arc<PropertyMap>,
    ) -> Self {
        let mut properties = (*base).clone();
        for (name, value) in &mut properties {
            let owner = OwnerLink {
                record: id,
                property: name.clone(),
            };
            tracked::with_tracker(value, |t| t.start_tracking(owner));
        }
        Self {
            id,
            class,
            version,
            properties,
            base,
            checkpoint: BTreeMap::new(),
            rewound: BTreeSet::new(),
            dirty_properties: BTreeSet::new(),
            removed_properties: BTreeSet::new(),
            dirty: false,
            modified: false,
            deleted: false,
            is_new: false,
            flushed: false,
            flushed_at: None,
            link_bag_threshold: DEFAULT_TREE_THRESHOLD,
        }
    }

    /// Returns the record identity.
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the committed version this copy was loaded at (0 for new
    /// records).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if the record has never been committed.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Returns true if the record is marked for deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns true if there are changes not yet reflected in the
    /// transaction's atomic operation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if committing would write a new version: the record
    /// is new, deleted, or its properties differ from the committed ones.
    /// Changes that were undone again do not count.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified && (self.is_new || self.deleted || self.properties != *self.base)
    }

    /// Returns all current properties.
    #[must_use]
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Property names assigned or mutated since the last checkpoint.
    #[must_use]
    pub fn dirty_properties(&self) -> &BTreeSet<String> {
        &self.dirty_properties
    }

    /// Property names removed since the last checkpoint.
    #[must_use]
    pub fn removed_properties(&self) -> &BTreeSet<String> {
        &self.removed_properties
    }

    /// Dirty and removed property names.
    pub fn touched_properties(&self) -> impl Iterator<Item = &String> {
        self.dirty_properties.union(&self.removed_properties)
    }

    /// Returns the change timeline of a container property.
    ///
    /// `None` for scalar or absent properties, for removed properties and
    /// for containers assigned as a new instance since the last checkpoint.
    #[must_use]
    pub fn change_timeline(&self, name: &str) -> Option<&Timeline> {
        tracked::tracker_of(self.properties.get(name)?)?.timeline()
    }

    /// Assigns a property.
    ///
    /// Assigning a value equal to the current one changes nothing. A
    /// container value is attached as a new instance: it has no timeline
    /// until the next checkpoint.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let mut value = value.into();
        if self.properties.get(&name) == Some(&value) {
            return;
        }
        let owner = OwnerLink {
            record: self.id,
            property: name.clone(),
        };
        tracked::with_tracker(&mut value, |t| t.attach_replaced(owner));
        self.materialize_checkpoint(&name);
        self.removed_properties.remove(&name);
        self.dirty_properties.insert(name.clone());
        self.properties.insert(name, value);
        self.mark_dirty();
    }

    /// Removes a property, returning its value.
    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.materialize_checkpoint(name);
        let old = self.properties.remove(name)?;
        self.dirty_properties.remove(name);
        self.removed_properties.insert(name.to_string());
        self.mark_dirty();
        Some(old)
    }

    /// Reads a list property. Fails if the property holds another kind.
    pub fn list(&self, name: &str) -> CoreResult<Option<&TrackedList>> {
        self.view(name, "list", Value::as_list)
    }

    /// Reads a set property. Fails if the property holds another kind.
    pub fn set(&self, name: &str) -> CoreResult<Option<&TrackedSet>> {
        self.view(name, "set", Value::as_set)
    }

    /// Reads a map property. Fails if the property holds another kind.
    pub fn map(&self, name: &str) -> CoreResult<Option<&TrackedMap>> {
        self.view(name, "map", Value::as_map)
    }

    /// Reads a LinkBag property. Fails if the property holds another kind.
    pub fn link_bag(&self, name: &str) -> CoreResult<Option<&LinkBag>> {
        self.view(name, "linkbag", Value::as_link_bag)
    }

    /// Mutable access to a list property, creating an empty list if absent.
    pub fn list_mut(&mut self, name: &str) -> CoreResult<ContainerMut<'_, TrackedList>> {
        self.ensure_container(name, "list", || Value::List(TrackedList::new()))?;
        let (slot, marks) = self.split(name);
        match slot {
            Some(Value::List(list)) => Ok(ContainerMut::new(list, marks, name, |l| {
                l.modification_count()
            })),
            other => Err(mismatch(name, "list", other.as_deref())),
        }
    }

    /// Mutable access to a set property, creating an empty set if absent.
    pub fn set_mut(&mut self, name: &str) -> CoreResult<ContainerMut<'_, TrackedSet>> {
        self.ensure_container(name, "set", || Value::Set(TrackedSet::new()))?;
        let (slot, marks) = self.split(name);
        match slot {
            Some(Value::Set(set)) => Ok(ContainerMut::new(set, marks, name, |s| {
                s.modification_count()
            })),
            other => Err(mismatch(name, "set", other.as_deref())),
        }
    }

    /// Mutable access to a map property, creating an empty map if absent.
    pub fn map_mut(&mut self, name: &str) -> CoreResult<ContainerMut<'_, TrackedMap>> {
        self.ensure_container(name, "map", || Value::Map(TrackedMap::new()))?;
        let (slot, marks) = self.split(name);
        match slot {
            Some(Value::Map(map)) => Ok(ContainerMut::new(map, marks, name, |m| {
                m.modification_count()
            })),
            other => Err(mismatch(name, "map", other.as_deref())),
        }
    }

    /// Mutable access to a LinkBag property, creating an empty bag if absent.
    pub fn link_bag_mut(&mut self, name: &str) -> CoreResult<ContainerMut<'_, LinkBag>> {
        let threshold = self.link_bag_threshold;
        self.ensure_container(name, "linkbag", || {
            Value::LinkBag(LinkBag::with_threshold(threshold))
        })?;
        let (slot, marks) = self.split(name);
        match slot {
            Some(Value::LinkBag(bag)) => Ok(ContainerMut::new(bag, marks, name, |b| {
                b.modification_count()
            })),
            other => Err(mismatch(name, "linkbag", other.as_deref())),
        }
    }

    /// The property values the indexes reflect for this record: the
    /// committed snapshot overlaid with every checkpoint taken since load.
    #[must_use]
    pub fn checkpoint_view(&self) -> CheckpointView<'_> {
        CheckpointView {
            base: &self.base,
            overrides: &self.checkpoint,
            rewound: self
                .rewound
                .iter()
                .map(|name| (name.as_str(), OnceCell::new()))
                .collect(),
            current: &self.properties,
        }
    }

    /// Sets the size above which LinkBags created through
    /// [`Record::link_bag_mut`] switch to the tree layout.
    pub(crate) fn set_link_bag_threshold(&mut self, threshold: usize) {
        self.link_bag_threshold = threshold;
    }

    pub(crate) fn delete(&mut self) {
        self.deleted = true;
        self.mark_dirty();
    }

    pub(crate) fn has_been_flushed(&self) -> bool {
        self.flushed
    }

    /// Remembers the schema epoch of the first flush.
    pub(crate) fn note_flush(&mut self, epoch: u64) {
        self.flushed_at.get_or_insert(epoch);
    }

    pub(crate) fn flushed_at(&self) -> Option<u64> {
        self.flushed_at
    }

    /// Records the current values as the new checkpoint and restarts
    /// every container timeline.
    pub(crate) fn checkpoint(&mut self) {
        let touched: Vec<String> = self.touched_properties().cloned().collect();
        for name in touched {
            if self.change_timeline(&name).is_some() {
                self.checkpoint.remove(&name);
                self.rewound.insert(name);
            } else {
                let current = self.properties.get(&name).cloned();
                self.rewound.remove(&name);
                self.checkpoint.insert(name, current);
            }
        }
        for value in self.properties.values_mut() {
            tracked::with_tracker(value, tracked::Tracker::checkpoint);
        }
        self.dirty_properties.clear();
        self.removed_properties.clear();
        self.dirty = false;
        self.flushed = true;
    }

    /// Copies a rewound checkpoint value out before its container instance
    /// is replaced or removed.
    fn materialize_checkpoint(&mut self, name: &str) {
        if !self.rewound.remove(name) {
            return;
        }
        let value = self.properties.get(name).map(before_timeline);
        self.checkpoint.insert(name.to_string(), value);
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.modified = true;
    }

    fn view<'a, T>(
        &'a self,
        name: &str,
        expected: &'static str,
        cast: impl FnOnce(&'a Value) -> Option<&'a T>,
    ) -> CoreResult<Option<&'a T>> {
        match self.properties.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => cast(value)
                .map(Some)
                .ok_or_else(|| mismatch(name, expected, Some(value))),
        }
    }

    fn ensure_container(
        &mut self,
        name: &str,
        expected: &'static str,
        create: impl FnOnce() -> Value,
    ) -> CoreResult<()> {
        match self.properties.get(name) {
            None | Some(Value::Null) => {
                self.set_property(name, create());
                Ok(())
            }
            Some(value) if value.kind() == expected => Ok(()),
            Some(value) => Err(mismatch(name, expected, Some(value))),
        }
    }

    fn split(&mut self, name: &str) -> (Option<&mut Value>, DirtyMarks<'_>) {
        let marks = DirtyMarks {
            dirty: &mut self.dirty,
            modified: &mut self.modified,
            properties: &mut self.dirty_properties,
        };
        (self.properties.get_mut(name), marks)
    }
}

/// A container as it was when its timeline started.
fn before_timeline(value: &Value) -> Value {
    match tracked::tracker_of(value).and_then(|t| t.timeline()) {
        Some(timeline) => tracked::rewind(value, timeline),
        None => value.clone(),
    }
}

fn mismatch(name: &str, expected: &'static str, actual: Option<&Value>) -> CoreError {
    CoreError::TypeConversion {
        property: name.to_string(),
        expected,
        actual: actual.map_or("null", Value::kind),
    }
}

struct DirtyMarks<'a> {
    dirty: &'a mut bool,
    modified: &'a mut bool,
    properties: &'a mut BTreeSet<String>,
}

/// Mutable handle to a container property.
///
/// Dropping the handle marks the property dirty if the container was
/// mutated through it.
pub struct ContainerMut<'a, T> {
    container: &'a mut T,
    marks: DirtyMarks<'a>,
    name: String,
    start: u64,
    count: fn(&T) -> u64,
}

impl<'a, T> ContainerMut<'a, T> {
    fn new(container: &'a mut T, marks: DirtyMarks<'a>, name: &str, count: fn(&T) -> u64) -> Self {
        let start = count(container);
        Self {
            container,
            marks,
            name: name.to_string(),
            start,
            count,
        }
    }
}

impl<T> Deref for ContainerMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.container
    }
}

impl<T> DerefMut for ContainerMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.container
    }
}

impl<T> Drop for ContainerMut<'_, T> {
    fn drop(&mut self) {
        if (self.count)(self.container) != self.start {
            *self.marks.dirty = true;
            *self.marks.modified = true;
            self.marks.properties.insert(std::mem::take(&mut self.name));
        }
    }
}

/// Property values of a record as of its last checkpoint.
///
/// Containers tracked since that checkpoint are rebuilt from their current
/// contents on first access.
#[derive(Debug)]
pub struct CheckpointView<'a> {
    base: &'a PropertyMap,
    overrides: &'a BTreeMap<String, Option<Value>>,
    rewound: BTreeMap<&'a str, OnceCell<Value>>,
    current: &'a PropertyMap,
}

impl PropertySource for CheckpointView<'_> {
    fn property(&self, name: &str) -> Option<&Value> {
        if let Some(cell) = self.rewound.get(name) {
            let value = self.current.get(name)?;
            return Some(cell.get_or_init(|| before_timeline(value)));
        }
        match self.overrides.get(name) {
            Some(value) => value.as_ref(),
            None => self.base.get(name),
        }
    }
}

impl PropertySource for Record {
    fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracked::ChangeKind;
    use crate::types::CollectionId;

    fn rid(pos: u64) -> RecordId {
        RecordId::new(CollectionId::new(1), pos)
    }

    fn committed(props: PropertyMap) -> Record {
        Record::from_committed(rid(1), Arc::from("Person"), 3, Arc::new(props))
    }

    #[test]
    fn loaded_containers_track_from_load() {
        let mut props = PropertyMap::new();
        props.insert("tags".into(), Value::List([1, 2].into_iter().collect()));
        let mut record = committed(props);
        assert!(record.change_timeline("tags").unwrap().is_empty());

        record.list_mut("tags").unwrap().push(3);
        assert!(record.is_dirty());
        assert!(record.dirty_properties().contains("tags"));
        let events = record.change_timeline("tags").unwrap().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Add);
    }

    #[test]
    fn equal_assignment_does_not_dirty() {
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("ann"));
        let mut record = committed(props);
        record.set_property("name", "ann");
        assert!(!record.is_dirty());
        assert!(record.dirty_properties().is_empty());
    }

    #[test]
    fn new_container_instance_has_no_timeline() {
        let mut props = PropertyMap::new();
        props.insert("tags".into(), Value::List([1].into_iter().collect()));
        let mut record = committed(props);
        record.set_property("tags", Value::List([5].into_iter().collect()));
        assert!(record.dirty_properties().contains("tags"));
        assert!(record.change_timeline("tags").is_none());
        assert!(record.list("tags").unwrap().unwrap().owner().is_some());

        record.checkpoint();
        assert!(record.change_timeline("tags").unwrap().is_empty());
    }

    #[test]
    fn removed_property_is_not_dirty() {
        let mut props = PropertyMap::new();
        props.insert("tags".into(), Value::List([1].into_iter().collect()));
        let mut record = committed(props);
        record.remove_property("tags");
        assert!(record.dirty_properties().is_empty());
        assert!(record.removed_properties().contains("tags"));
        assert!(record.change_timeline("tags").is_none());
        assert!(record.is_dirty());
    }

    #[test]
    fn wrong_view_is_type_conversion() {
        let mut record = Record::new(rid(2), Arc::from("Person"));
        record.set_property("tags", Value::List(TrackedList::new()));
        let err = record.set("tags").unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeConversion {
                expected: "set",
                actual: "list",
                ..
            }
        ));
        assert!(record.set_mut("tags").is_err());
        assert!(record.list("tags").unwrap().is_some());
    }

    #[test]
    fn untouched_guard_does_not_dirty() {
        let mut props = PropertyMap::new();
        props.insert("tags".into(), Value::Set(["a"].into_iter().collect()));
        let mut record = committed(props);
        {
            let mut tags = record.set_mut("tags").unwrap();
            assert!(!tags.insert("a"));
        }
        assert!(!record.is_dirty());
    }

    #[test]
    fn checkpoint_view_tracks_last_flush() {
        let mut props = PropertyMap::new();
        props.insert("age".into(), Value::Integer(30));
        let mut record = committed(props);
        record.set_property("age", 31);
        assert_eq!(
            record.checkpoint_view().property("age"),
            Some(&Value::Integer(30))
        );
        record.checkpoint();
        record.set_property("age", 32);
        assert_eq!(
            record.checkpoint_view().property("age"),
            Some(&Value::Integer(31))
        );
        record.remove_property("age");
        record.checkpoint();
        assert_eq!(record.checkpoint_view().property("age"), None);
    }

    #[test]
    fn reverted_change_is_not_a_modification() {
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("ann"));
        let mut record = committed(props);
        record.set_property("name", "bea");
        assert!(record.is_modified());
        record.set_property("name", "ann");
        assert!(!record.is_modified());
    }

    #[test]
    fn tracked_container_checkpoint_rewinds_timeline() {
        let mut props = PropertyMap::new();
        props.insert("tags".into(), Value::List([1, 2].into_iter().collect()));
        let mut record = committed(props);
        record.list_mut("tags").unwrap().push(3);
        record.checkpoint();
        assert!(record.checkpoint.is_empty());

        record.list_mut("tags").unwrap().remove_at(0).unwrap();
        let at_checkpoint = Value::List([1, 2, 3].into_iter().collect());
        assert_eq!(record.checkpoint_view().property("tags"), Some(&at_checkpoint));

        record.set_property("tags", Value::List([9].into_iter().collect()));
        assert_eq!(record.checkpoint_view().property("tags"), Some(&at_checkpoint));
        record.remove_property("tags");
        assert_eq!(record.checkpoint_view().property("tags"), Some(&at_checkpoint));
    }
}
