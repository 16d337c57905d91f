//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random values, class names and
//! container edit scripts.

use proptest::prelude::*;
use vinedb_core::{TrackedList, TrackedMap, TrackedSet, Value};

/// Strategy for generating valid class names.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for short tags drawn from a small alphabet, so that generated
/// edit scripts hit duplicates often.
pub fn tag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-e]{1,2}").expect("Invalid regex")
}

/// Strategy for scalar property values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-zA-Z]{0,8}".prop_map(Value::String),
    ]
}

/// Strategy for an ordered `(lo, hi)` pair of integers.
pub fn bounds_strategy(max: i64) -> impl Strategy<Value = (i64, i64)> {
    (0..max, 0..max).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}

/// One edit applied to a list, set or map of tags.
#[derive(Debug, Clone)]
pub enum ContainerEdit {
    /// Add an item.
    Add(String),
    /// Remove an item by value (a map removes by key).
    Remove(String),
    /// Replace the item at a position modulo the length (a map updates a key).
    Replace(usize, String),
    /// Remove every item.
    Clear,
}

/// Strategy for a single container edit. `Clear` is rare.
pub fn container_edit_strategy() -> impl Strategy<Value = ContainerEdit> {
    prop_oneof![
        4 => tag_strategy().prop_map(ContainerEdit::Add),
        3 => tag_strategy().prop_map(ContainerEdit::Remove),
        2 => (any::<usize>(), tag_strategy()).prop_map(|(i, t)| ContainerEdit::Replace(i, t)),
        1 => Just(ContainerEdit::Clear),
    ]
}

/// Strategy for a script of container edits.
pub fn edit_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<ContainerEdit>> {
    prop::collection::vec(container_edit_strategy(), 0..max_len)
}

/// Applies an edit to a list.
pub fn apply_list_edit(list: &mut TrackedList, edit: &ContainerEdit) {
    match edit {
        ContainerEdit::Add(tag) => list.push(tag.as_str()),
        ContainerEdit::Remove(tag) => {
            list.remove_value(&Value::from(tag.as_str()));
        }
        ContainerEdit::Replace(index, tag) => {
            if !list.is_empty() {
                let _ = list.set(index % list.len(), tag.as_str());
            }
        }
        ContainerEdit::Clear => list.clear(),
    }
}

/// Applies an edit to a set.
pub fn apply_set_edit(set: &mut TrackedSet, edit: &ContainerEdit) {
    match edit {
        ContainerEdit::Add(tag) | ContainerEdit::Replace(_, tag) => {
            set.insert(tag.as_str());
        }
        ContainerEdit::Remove(tag) => {
            set.remove(&Value::from(tag.as_str()));
        }
        ContainerEdit::Clear => set.clear(),
    }
}

/// Applies an edit to a map keyed by tag, valued by the tag length.
pub fn apply_map_edit(map: &mut TrackedMap, edit: &ContainerEdit) {
    match edit {
        ContainerEdit::Add(tag) => {
            map.insert(tag.as_str(), tag.len() as i64);
        }
        ContainerEdit::Replace(index, tag) => {
            map.insert(tag.as_str(), *index as i64 % 3);
        }
        ContainerEdit::Remove(tag) => {
            map.remove(tag);
        }
        ContainerEdit::Clear => map.clear(),
    }
}
