//! Property values.
//!
//! [`Value`] is the tagged union stored in record properties. It has a total
//! order and a hash that agree with its equality, so any value can serve as
//! (part of) an index key:
//!
//! - values of different kinds order by kind: null, bool, number, datetime,
//!   string, binary, link, embedded, list, set, map, LinkBag
//! - integers and floats compare numerically; on a numeric tie the integer
//!   sorts first, so `1` and `1.0` stay distinct keys
//! - floats use IEEE total ordering

mod property_type;

pub use property_type::PropertyType;

use crate::tracked::{LinkBag, TrackedList, TrackedMap, TrackedSet};
use crate::types::RecordId;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Property name to value mapping of a record.
pub type PropertyMap = BTreeMap<String, Value>;

/// A record without identity, stored inline in its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmbeddedRecord {
    properties: PropertyMap,
}

impl EmbeddedRecord {
    /// Creates an empty embedded record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Sets a property.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Returns a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }
}

/// A property value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer family (byte, short, integer, long).
    Integer(i64),
    /// Floating point family (float, double).
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Date or date-time, milliseconds since the Unix epoch (UTC).
    DateTime(i64),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Reference to another record.
    Link(RecordId),
    /// Inline record.
    Embedded(EmbeddedRecord),
    /// Ordered list.
    List(TrackedList),
    /// Unordered set.
    Set(TrackedSet),
    /// String-keyed map.
    Map(TrackedMap),
    /// Multiset of references.
    LinkBag(LinkBag),
}

impl Value {
    /// Returns the kind name used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Binary(_) => "binary",
            Value::Link(_) => "link",
            Value::Embedded(_) => "embedded",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::LinkBag(_) => "linkbag",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::DateTime(_) => 3,
            Value::String(_) => 4,
            Value::Binary(_) => 5,
            Value::Link(_) => 6,
            Value::Embedded(_) => 7,
            Value::List(_) => 8,
            Value::Set(_) => 9,
            Value::Map(_) => 10,
            Value::LinkBag(_) => 11,
        }
    }

    /// Check if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for list, set, map and LinkBag values.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Value::List(_) | Value::Set(_) | Value::Map(_) | Value::LinkBag(_)
        )
    }

    /// Get this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a link, if it is one.
    #[must_use]
    pub fn as_link(&self) -> Option<RecordId> {
        match self {
            Value::Link(rid) => Some(*rid),
            _ => None,
        }
    }

    /// Get this value as an embedded record, if it is one.
    #[must_use]
    pub fn as_embedded(&self) -> Option<&EmbeddedRecord> {
        match self {
            Value::Embedded(e) => Some(e),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&TrackedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get this value as a set, if it is one.
    #[must_use]
    pub fn as_set(&self) -> Option<&TrackedSet> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&TrackedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a LinkBag, if it is one.
    #[must_use]
    pub fn as_link_bag(&self) -> Option<&LinkBag> {
        match self {
            Value::LinkBag(b) => Some(b),
            _ => None,
        }
    }
}

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    #[allow(clippy::cast_precision_loss)]
    match (i as f64).total_cmp(&f) {
        Ordering::Equal => Ordering::Less,
        ord => ord,
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::Embedded(a), Value::Embedded(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.as_slice().cmp(b.as_slice()),
            (Value::Set(a), Value::Set(b)) => a.iter().cmp(b.iter()),
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            (Value::LinkBag(a), Value::LinkBag(b)) => a.sorted_entries().cmp(&b.sorted_entries()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(n) => {
                state.write_u8(0);
                n.hash(state);
            }
            Value::Float(f) => {
                state.write_u8(1);
                f.to_bits().hash(state);
            }
            Value::DateTime(ms) => ms.hash(state),
            Value::String(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
            Value::Link(rid) => rid.hash(state),
            Value::Embedded(e) => e.hash(state),
            Value::List(l) => l.as_slice().hash(state),
            Value::Set(s) => {
                for v in s.iter() {
                    v.hash(state);
                }
            }
            Value::Map(m) => {
                for (k, v) in m.iter() {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::LinkBag(b) => b.sorted_entries().hash(state),
        }
    }
}

fn write_seq<I, T>(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: I) -> fmt::Result
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    f.write_str(open)?;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::DateTime(ms) => match chrono::DateTime::from_timestamp_millis(*ms) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
                None => write!(f, "datetime({ms})"),
            },
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Link(rid) => write!(f, "{rid}"),
            Value::Embedded(e) => write_seq(
                f,
                "{",
                "}",
                e.properties().iter().map(|(k, v)| format!("{k}: {v}")),
            ),
            Value::List(l) => write_seq(f, "[", "]", l.iter()),
            Value::Set(s) => write_seq(f, "<", ">", s.iter()),
            Value::Map(m) => write_seq(f, "{", "}", m.iter().map(|(k, v)| format!("{k}: {v}"))),
            Value::LinkBag(b) => write_seq(f, "[", "]", b.iter()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<RecordId> for Value {
    fn from(v: RecordId) -> Self {
        Value::Link(v)
    }
}

impl From<EmbeddedRecord> for Value {
    fn from(v: EmbeddedRecord) -> Self {
        Value::Embedded(v)
    }
}

impl From<TrackedList> for Value {
    fn from(v: TrackedList) -> Self {
        Value::List(v)
    }
}

impl From<TrackedSet> for Value {
    fn from(v: TrackedSet) -> Self {
        Value::Set(v)
    }
}

impl From<TrackedMap> for Value {
    fn from(v: TrackedMap) -> Self {
        Value::Map(v)
    }
}

impl From<LinkBag> for Value {
    fn from(v: LinkBag) -> Self {
        Value::LinkBag(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectionId;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn kinds_order_before_content() {
        let mut values = vec![
            Value::from("a"),
            Value::Integer(5),
            Value::Null,
            Value::Bool(true),
            Value::Link(RecordId::new(CollectionId::new(1), 1)),
        ];
        values.sort();
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Integer(5));
        assert_eq!(values[3], Value::from("a"));
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert!(Value::Integer(1) < Value::Float(1.5));
        assert!(Value::Float(0.5) < Value::Integer(1));
        assert!(Value::Integer(1) < Value::Float(1.0));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Value::List(TrackedList::from_values([Value::Integer(1), Value::from("x")]));
        let b = Value::List(TrackedList::from_values([Value::Integer(1), Value::from("x")]));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(hash_of(&Value::Float(2.5)), hash_of(&Value::Float(2.5)));
    }

    #[test]
    fn display_renders_nested_values() {
        let embedded = EmbeddedRecord::new().with("city", "Rome");
        assert_eq!(Value::from(embedded).to_string(), "{city: \"Rome\"}");
        let list = TrackedList::from_values([Value::Integer(1), Value::Null]);
        assert_eq!(Value::from(list).to_string(), "[1, null]");
    }

    #[test]
    fn option_converts_to_null() {
        let none: Option<i64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some(3)), Value::Integer(3));
    }
}
