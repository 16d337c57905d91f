//! Declared property types and key conversion.

use super::Value;
use crate::types::RecordId;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Declared type of an indexed property (or of the elements of an indexed
/// collection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// `true`/`false`.
    Boolean,
    /// 8-bit integer.
    Byte,
    /// 16-bit integer.
    Short,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Calendar day (time part truncated).
    Date,
    /// Instant with millisecond precision.
    DateTime,
    /// Raw bytes.
    Binary,
    /// Reference to a record.
    Link,
    /// Inline record.
    Embedded,
    /// List of values.
    EmbeddedList,
    /// Set of values.
    EmbeddedSet,
    /// Map of values.
    EmbeddedMap,
    /// List of links.
    LinkList,
    /// Set of links.
    LinkSet,
    /// Map of links.
    LinkMap,
    /// LinkBag.
    LinkBag,
    /// No conversion.
    Any,
}

impl PropertyType {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PropertyType::Boolean => "BOOLEAN",
            PropertyType::Byte => "BYTE",
            PropertyType::Short => "SHORT",
            PropertyType::Integer => "INTEGER",
            PropertyType::Long => "LONG",
            PropertyType::Float => "FLOAT",
            PropertyType::Double => "DOUBLE",
            PropertyType::String => "STRING",
            PropertyType::Date => "DATE",
            PropertyType::DateTime => "DATETIME",
            PropertyType::Binary => "BINARY",
            PropertyType::Link => "LINK",
            PropertyType::Embedded => "EMBEDDED",
            PropertyType::EmbeddedList => "EMBEDDEDLIST",
            PropertyType::EmbeddedSet => "EMBEDDEDSET",
            PropertyType::EmbeddedMap => "EMBEDDEDMAP",
            PropertyType::LinkList => "LINKLIST",
            PropertyType::LinkSet => "LINKSET",
            PropertyType::LinkMap => "LINKMAP",
            PropertyType::LinkBag => "LINKBAG",
            PropertyType::Any => "ANY",
        }
    }

    /// Returns true for collection-valued types.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(
            self,
            PropertyType::EmbeddedList
                | PropertyType::EmbeddedSet
                | PropertyType::EmbeddedMap
                | PropertyType::LinkList
                | PropertyType::LinkSet
                | PropertyType::LinkMap
                | PropertyType::LinkBag
        )
    }

    /// Converts a value to this type.
    ///
    /// Null converts to null. Returns `None` when the value has no
    /// representation in this type (`"tt"` as an integer, 300 as a byte).
    #[must_use]
    pub fn convert(self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match self {
            PropertyType::Any => Some(value.clone()),
            PropertyType::Boolean => to_bool(value).map(Value::Bool),
            PropertyType::Byte => to_integer(value)
                .filter(|n| i8::try_from(*n).is_ok())
                .map(Value::Integer),
            PropertyType::Short => to_integer(value)
                .filter(|n| i16::try_from(*n).is_ok())
                .map(Value::Integer),
            PropertyType::Integer => to_integer(value)
                .filter(|n| i32::try_from(*n).is_ok())
                .map(Value::Integer),
            PropertyType::Long => to_integer(value).map(Value::Integer),
            PropertyType::Float | PropertyType::Double => to_float(value).map(Value::Float),
            PropertyType::String => to_string(value).map(Value::String),
            PropertyType::Date => {
                to_millis(value).map(|ms| Value::DateTime(ms.div_euclid(MILLIS_PER_DAY) * MILLIS_PER_DAY))
            }
            PropertyType::DateTime => to_millis(value).map(Value::DateTime),
            PropertyType::Binary => match value {
                Value::Binary(_) => Some(value.clone()),
                _ => None,
            },
            PropertyType::Link => match value {
                Value::Link(_) => Some(value.clone()),
                Value::String(s) => s.parse::<RecordId>().ok().map(Value::Link),
                _ => None,
            },
            PropertyType::Embedded => match value {
                Value::Embedded(_) => Some(value.clone()),
                _ => None,
            },
            PropertyType::EmbeddedList | PropertyType::LinkList => match value {
                Value::List(_) => Some(value.clone()),
                _ => None,
            },
            PropertyType::EmbeddedSet | PropertyType::LinkSet => match value {
                Value::Set(_) => Some(value.clone()),
                _ => None,
            },
            PropertyType::EmbeddedMap | PropertyType::LinkMap => match value {
                Value::Map(_) => Some(value.clone()),
                _ => None,
            },
            PropertyType::LinkBag => match value {
                Value::LinkBag(_) => Some(value.clone()),
                _ => None,
            },
        }
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
        Value::DateTime(ms) => Some(*ms),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Integer(n) => Some(*n as f64),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Link(rid) => Some(rid.to_string()),
        _ => None,
    }
}

fn to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::DateTime(ms) | Value::Integer(ms) => Some(*ms),
        Value::String(s) => parse_datetime(s.trim()),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.to_ascii_uppercase().as_str() {
            "BOOLEAN" => PropertyType::Boolean,
            "BYTE" => PropertyType::Byte,
            "SHORT" => PropertyType::Short,
            "INTEGER" => PropertyType::Integer,
            "LONG" => PropertyType::Long,
            "FLOAT" => PropertyType::Float,
            "DOUBLE" => PropertyType::Double,
            "STRING" => PropertyType::String,
            "DATE" => PropertyType::Date,
            "DATETIME" => PropertyType::DateTime,
            "BINARY" => PropertyType::Binary,
            "LINK" => PropertyType::Link,
            "EMBEDDED" => PropertyType::Embedded,
            "EMBEDDEDLIST" => PropertyType::EmbeddedList,
            "EMBEDDEDSET" => PropertyType::EmbeddedSet,
            "EMBEDDEDMAP" => PropertyType::EmbeddedMap,
            "LINKLIST" => PropertyType::LinkList,
            "LINKSET" => PropertyType::LinkSet,
            "LINKMAP" => PropertyType::LinkMap,
            "LINKBAG" => PropertyType::LinkBag,
            "ANY" => PropertyType::Any,
            other => return Err(format!("unknown property type: {other}")),
        };
        Ok(ty)
    }
}
