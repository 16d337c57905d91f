//! Class and index catalog.

use super::{Index, IndexDefinition};
use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, RecordId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A registered record class.
#[derive(Debug)]
pub(crate) struct ClassInfo {
    id: CollectionId,
    name: Arc<str>,
    next_position: AtomicU64,
}

impl ClassInfo {
    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Allocates the identity of a new record. Positions are never reused,
    /// even when the allocating transaction rolls back.
    pub fn allocate(&self) -> RecordId {
        let position = self.next_position.fetch_add(1, Ordering::Relaxed);
        RecordId::new(self.id, position)
    }
}

/// Classes and indexes of one database.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    classes: RwLock<BTreeMap<String, Arc<ClassInfo>>>,
    by_id: RwLock<FxHashMap<CollectionId, Arc<ClassInfo>>>,
    indexes: RwLock<BTreeMap<String, Arc<Index>>>,
    next_class_id: AtomicU32,
    /// Source of index generations and registration stamps. Every value is
    /// handed out once, so no two index instances share a generation.
    epoch: AtomicU64,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_class(&self, name: &str) -> CoreResult<Arc<ClassInfo>> {
        let mut classes = self.classes.write();
        if classes.contains_key(name) {
            return Err(CoreError::invalid_operation(format!(
                "class '{name}' already exists"
            )));
        }
        let id = CollectionId::new(self.next_class_id.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(ClassInfo {
            id,
            name: Arc::from(name),
            next_position: AtomicU64::new(0),
        });
        classes.insert(name.to_string(), Arc::clone(&info));
        self.by_id.write().insert(id, Arc::clone(&info));
        Ok(info)
    }

    pub fn class(&self, name: &str) -> CoreResult<Arc<ClassInfo>> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::class_not_found(name))
    }

    pub fn class_by_id(&self, id: CollectionId) -> Option<Arc<ClassInfo>> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.read().keys().cloned().collect()
    }

    /// Fails unless an index with this definition could be registered.
    pub fn check_new_index(&self, definition: &IndexDefinition) -> CoreResult<()> {
        self.class(definition.class())?;
        if self.indexes.read().contains_key(definition.name()) {
            return Err(CoreError::IndexExists {
                name: definition.name().to_string(),
            });
        }
        Ok(())
    }

    /// Hands out a fresh epoch.
    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Makes a built index visible to transactions, stamping it with the
    /// epoch it became visible at.
    pub fn register_index(&self, index: Arc<Index>) -> CoreResult<()> {
        self.check_new_index(&index.definition_guard())?;
        let mut indexes = self.indexes.write();
        index.mark_registered(self.next_epoch());
        indexes.insert(index.name().to_string(), index);
        Ok(())
    }

    pub fn index(&self, name: &str) -> CoreResult<Arc<Index>> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::index_not_found(name))
    }

    pub fn drop_index(&self, name: &str) -> CoreResult<Arc<Index>> {
        self.indexes
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::index_not_found(name))
    }

    /// Indexes over `class`, in name order.
    pub fn indexes_for_class(&self, class: &str) -> Vec<Arc<Index>> {
        self.indexes_for_class_at(class).0
    }

    /// Indexes over `class` together with the current epoch. Every index
    /// registered later carries a higher registration stamp.
    pub fn indexes_for_class_at(&self, class: &str) -> (Vec<Arc<Index>>, u64) {
        let indexes = self.indexes.read();
        let epoch = self.epoch.load(Ordering::Acquire);
        let matching = indexes
            .values()
            .filter(|index| index.definition_guard().class() == class)
            .cloned()
            .collect();
        (matching, epoch)
    }

    pub fn indexes(&self) -> Vec<Arc<Index>> {
        self.indexes.read().values().cloned().collect()
    }
}
