//! Index maintenance: turning record changes into staged index changes.
//!
//! A flush compares what the indexes currently reflect for a record (its
//! checkpoint view) with its current properties, stages the difference on
//! the transaction's [`AtomicOperation`] and checkpoints the record.
//!
//! For an index with one collection field whose container kept its
//! timeline since the last checkpoint, the difference is derived from the
//! timeline instead of from two full key sets. Both paths stage the same
//! net changes.

use crate::atomic::{AtomicOperation, StagedOp};
use crate::error::CoreResult;
use crate::index::{ExtractionMode, Index, IndexDefinition, IndexField, IndexKey};
use crate::record::Record;
use crate::tracked::{ChangeKind, DeltaCounter, EventKey, Timeline};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Staged changes for one index, computed before anything is staged so a
/// failing key conversion leaves the operation untouched.
struct IndexPlan<'a> {
    index: &'a Index,
    changes: Vec<(IndexKey, StagedOp)>,
}

/// Flushes one record against the indexes of its class.
///
/// Returns the number of changes handed to the indexes.
pub(crate) fn flush_record(
    indexes: &[Arc<Index>],
    op: &mut AtomicOperation,
    record: &mut Record,
) -> CoreResult<usize> {
    if !record.is_dirty() {
        return Ok(0);
    }

    let mut plans = Vec::with_capacity(indexes.len());
    for index in indexes {
        let definition = index.definition_guard();
        let changes = if record.is_deleted() {
            deletion_changes(&definition, record)?
        } else {
            update_changes(&definition, record)?
        };
        if !changes.is_empty() {
            plans.push(IndexPlan { index, changes });
        }
    }

    let mut staged = 0;
    for plan in plans {
        staged += plan.changes.len();
        for (key, kind) in plan.changes {
            plan.index.stage(op, key, record.id(), kind);
        }
    }
    tracing::trace!(record = %record.id(), staged, "flushed record");
    record.checkpoint();
    Ok(staged)
}

fn deletion_changes(definition: &IndexDefinition, record: &Record) -> CoreResult<Vec<(IndexKey, StagedOp)>> {
    if record.is_new() && !record.has_been_flushed() {
        return Ok(Vec::new());
    }
    Ok(definition
        .keys_for(&record.checkpoint_view())?
        .into_iter()
        .map(|key| (key, StagedOp::Remove))
        .collect())
}

fn update_changes(definition: &IndexDefinition, record: &Record) -> CoreResult<Vec<(IndexKey, StagedOp)>> {
    if record.is_new() && !record.has_been_flushed() {
        return Ok(definition
            .keys_for(record)?
            .into_iter()
            .map(|key| (key, StagedOp::Put))
            .collect());
    }

    let touched: HashSet<&str> = record.touched_properties().map(String::as_str).collect();
    if !definition.fields().iter().any(|f| touched.contains(f.root())) {
        return Ok(Vec::new());
    }

    if let Some((field, timeline)) = timeline_source(definition, record, &touched) {
        return timeline_changes(definition, record, field, timeline);
    }
    full_diff(definition, record)
}

/// The collection field and its timeline, when the index delta can be
/// derived from the timeline alone.
fn timeline_source<'r, 'd>(
    definition: &'d IndexDefinition,
    record: &'r Record,
    touched: &HashSet<&str>,
) -> Option<(&'d IndexField, &'r Timeline)> {
    let (position, field) = definition.collection_field()?;
    if field.is_nested() {
        return None;
    }
    let others_touched = definition
        .fields()
        .iter()
        .enumerate()
        .any(|(i, f)| i != position && touched.contains(f.root()));
    if others_touched {
        return None;
    }
    let timeline = record.change_timeline(field.root())?;
    Some((field, timeline))
}

fn full_diff(definition: &IndexDefinition, record: &Record) -> CoreResult<Vec<(IndexKey, StagedOp)>> {
    let old = definition.keys_for(&record.checkpoint_view())?;
    let new = definition.keys_for(record)?;
    let mut changes: Vec<_> = old
        .difference(&new)
        .map(|key| (key.clone(), StagedOp::Remove))
        .collect();
    changes.extend(new.difference(&old).map(|key| (key.clone(), StagedOp::Put)));
    Ok(changes)
}

fn timeline_changes(
    definition: &IndexDefinition,
    record: &Record,
    field: &IndexField,
    timeline: &Timeline,
) -> CoreResult<Vec<(IndexKey, StagedOp)>> {
    let (added_items, removed_items) = item_delta(field, timeline).into_parts();

    let mut keys = DeltaCounter::default();
    for item in &added_items {
        for key in definition.keys_for_item(record, item)? {
            keys.add(key);
        }
    }
    let mut sources: BTreeMap<IndexKey, Vec<&Value>> = BTreeMap::new();
    for item in &removed_items {
        for key in definition.keys_for_item(record, item)? {
            sources.entry(key.clone()).or_default().push(item);
            keys.remove(key);
        }
    }
    let (added, removed) = keys.into_parts();

    let mut changes: Vec<_> = added.into_iter().map(|key| (key, StagedOp::Put)).collect();
    // A removed item may share its key with an item that is still present.
    let container = field.resolve(record);
    let mut unresolved = BTreeSet::new();
    for key in removed {
        let items = sources.get(&key).map_or(&[][..], Vec::as_slice);
        match container {
            Some(container) if items.iter().all(|item| field.is_exact_item(container, item)) => {
                if !items.iter().any(|item| field.holds_item(container, item)) {
                    changes.push((key, StagedOp::Remove));
                }
            }
            Some(_) => {
                unresolved.insert(key);
            }
            None => changes.push((key, StagedOp::Remove)),
        }
    }
    if !unresolved.is_empty() {
        let vanished = unproduced_keys(definition, record, field, unresolved)?;
        changes.extend(vanished.into_iter().map(|key| (key, StagedOp::Remove)));
    }
    Ok(changes)
}

/// The subset of `keys` that no current item of `field` produces.
fn unproduced_keys(
    definition: &IndexDefinition,
    record: &Record,
    field: &IndexField,
    mut keys: BTreeSet<IndexKey>,
) -> CoreResult<BTreeSet<IndexKey>> {
    let Some(container) = field.resolve(record) else {
        return Ok(keys);
    };
    for item in field.items(container) {
        if keys.is_empty() {
            break;
        }
        for key in definition.keys_for_item(record, &item)? {
            keys.remove(&key);
        }
    }
    Ok(keys)
}

/// Net added and removed items of a collection field.
fn item_delta(field: &IndexField, timeline: &Timeline) -> DeltaCounter<Value> {
    let mut items = DeltaCounter::default();
    for event in timeline {
        match (event.key(), event.kind()) {
            (EventKey::Entry(entry), ChangeKind::Add) => {
                entry.links().for_each(|link| items.add(Value::Link(link)));
            }
            (EventKey::Entry(entry), ChangeKind::Remove) => {
                entry.links().for_each(|link| items.remove(Value::Link(link)));
            }
            (EventKey::Key(key), kind) if field.extraction() == Some(ExtractionMode::MapKeys) => match kind {
                ChangeKind::Add => items.add(Value::String(key.clone())),
                ChangeKind::Remove => items.remove(Value::String(key.clone())),
                ChangeKind::Update => {}
            },
            _ => {
                if let Some(value) = event.value() {
                    items.add(value.clone());
                }
                if let Some(old) = event.old_value() {
                    items.remove(old.clone());
                }
            }
        }
    }
    items
}
