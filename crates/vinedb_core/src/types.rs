//! Core type definitions for VineDB.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Sequence number for ordering commits.
///
/// Every successful commit publishes exactly one sequence number. A
/// transaction snapshot is the sequence number that was committed when it
/// began; it observes everything at or below it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier for a collection (the storage of one class).
///
/// Collection IDs are stable and assigned when classes are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(pub u32);

impl CollectionId {
    /// Creates a new collection ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col:{}", self.0)
    }
}

/// Identity of a record: its collection plus a position inside it.
///
/// Positions are handed out once and never reused, so an identity stays
/// valid for the whole life of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    collection: CollectionId,
    position: u64,
}

impl RecordId {
    /// Creates a record identity.
    #[must_use]
    pub const fn new(collection: CollectionId, position: u64) -> Self {
        Self {
            collection,
            position,
        }
    }

    /// Returns the collection part.
    #[must_use]
    pub const fn collection(self) -> CollectionId {
        self.collection
    }

    /// Returns the position part.
    #[must_use]
    pub const fn position(self) -> u64 {
        self.position
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.collection.0, self.position)
    }
}

/// Error returned when parsing a `#collection:position` string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRecordIdError(String);

impl fmt::Display for ParseRecordIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid record id: {}", self.0)
    }
}

impl std::error::Error for ParseRecordIdError {}

impl FromStr for RecordId {
    type Err = ParseRecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRecordIdError(s.to_string());
        let body = s.trim().strip_prefix('#').ok_or_else(err)?;
        let (collection, position) = body.split_once(':').ok_or_else(err)?;
        let collection = collection.parse::<u32>().map_err(|_| err())?;
        let position = position.parse::<u64>().map_err(|_| err())?;
        Ok(Self::new(CollectionId::new(collection), position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn sequence_number_next() {
        let s1 = SequenceNumber::new(5);
        let s2 = s1.next();
        assert_eq!(s2.as_u64(), 6);
    }

    #[test]
    fn collection_id_display() {
        let c = CollectionId::new(42);
        assert_eq!(format!("{c}"), "col:42");
    }

    #[test]
    fn record_id_orders_by_collection_then_position() {
        let a = RecordId::new(CollectionId::new(1), 9);
        let b = RecordId::new(CollectionId::new(2), 0);
        let c = RecordId::new(CollectionId::new(2), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn record_id_parse_roundtrip() {
        let rid = RecordId::new(CollectionId::new(12), 345);
        assert_eq!(rid.to_string(), "#12:345");
        assert_eq!("#12:345".parse::<RecordId>().unwrap(), rid);
        assert!("12:345".parse::<RecordId>().is_err());
        assert!("#a:1".parse::<RecordId>().is_err());
    }
}
