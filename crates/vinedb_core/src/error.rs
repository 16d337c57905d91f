//! Error types for VineDB core.

use crate::types::RecordId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in VineDB core operations.
///
/// None of these are fatal to the process. They are all recovered at the
/// transaction boundary, where the caller decides whether to retry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record modified by this transaction was committed by someone else
    /// after it was first read.
    #[error("concurrent modification of record {record}: expected version {expected}, found {actual}")]
    Conflict {
        /// The conflicting record.
        record: RecordId,
        /// Version observed when the record was first touched.
        expected: u64,
        /// Version currently committed.
        actual: u64,
    },

    /// A unique index would map one key to more than one record.
    #[error("duplicate key {key} in unique index '{index}': already held by {existing}, rejected for {offending}")]
    UniquenessViolation {
        /// Index name.
        index: String,
        /// Rendered key.
        key: String,
        /// The record already holding the key.
        existing: RecordId,
        /// The record that tried to take the key.
        offending: RecordId,
    },

    /// A property was read through a view that does not match its value.
    #[error("property '{property}' is {actual}, not {expected}")]
    TypeConversion {
        /// Property name.
        property: String,
        /// Requested view.
        expected: &'static str,
        /// Actual value kind.
        actual: &'static str,
    },

    /// The transaction stack was invalidated by an earlier rollback.
    #[error("transaction rolled back: {message}")]
    Rollback {
        /// Description of the rollback.
        message: String,
    },

    /// The record does not exist at the transaction snapshot, or was deleted.
    #[error("record not found: {record}")]
    RecordNotFound {
        /// The missing record.
        record: RecordId,
    },

    /// A value could not be converted to the declared key type of an index field.
    #[error("index '{index}': cannot convert {value} to {target}")]
    KeyConversion {
        /// Index name.
        index: String,
        /// Rendered source value.
        value: String,
        /// Declared key type.
        target: String,
    },

    /// Index does not exist.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name of the index.
        name: String,
    },

    /// An index with this name already exists.
    #[error("index already exists: {name}")]
    IndexExists {
        /// Name of the index.
        name: String,
    },

    /// Class does not exist.
    #[error("class not found: {name}")]
    ClassNotFound {
        /// Name of the class.
        name: String,
    },

    /// The property is not one of the index's fields.
    #[error("property '{property}' is not indexed by '{index}'")]
    PropertyNotIndexed {
        /// Index name.
        index: String,
        /// Property path.
        property: String,
    },

    /// The index cannot answer this kind of query.
    #[error("index '{index}' does not support {message}")]
    UnsupportedQuery {
        /// Index name.
        index: String,
        /// What was asked.
        message: String,
    },

    /// No transaction is active on the session.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a rollback error.
    pub fn rollback(message: impl Into<String>) -> Self {
        Self::Rollback {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an index not found error.
    pub fn index_not_found(name: impl Into<String>) -> Self {
        Self::IndexNotFound { name: name.into() }
    }

    /// Creates a class not found error.
    pub fn class_not_found(name: impl Into<String>) -> Self {
        Self::ClassNotFound { name: name.into() }
    }

    /// Creates an unsupported query error.
    pub fn unsupported_query(index: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            index: index.into(),
            message: message.into(),
        }
    }

    /// Creates a key conversion error.
    pub fn key_conversion(
        index: impl Into<String>,
        value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::KeyConversion {
            index: index.into(),
            value: value.into(),
            target: target.into(),
        }
    }

    /// Returns true if rerunning the whole unit of work may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true for failures that abort a commit.
    #[must_use]
    pub fn is_commit_failure(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::UniquenessViolation { .. } | Self::KeyConversion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectionId;

    #[test]
    fn conflict_is_retryable() {
        let err = CoreError::Conflict {
            record: RecordId::new(CollectionId::new(3), 7),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_retryable());
        assert!(err.is_commit_failure());
        assert_eq!(
            err.to_string(),
            "concurrent modification of record #3:7: expected version 1, found 2"
        );
    }

    #[test]
    fn type_conversion_is_local() {
        let err = CoreError::TypeConversion {
            property: "tags".into(),
            expected: "set",
            actual: "list",
        };
        assert!(!err.is_retryable());
        assert!(!err.is_commit_failure());
        assert_eq!(err.to_string(), "property 'tags' is list, not set");
    }

    #[test]
    fn helper_constructors() {
        let err = CoreError::key_conversion("idx", "\"tt\"", "INTEGER");
        assert!(matches!(err, CoreError::KeyConversion { .. }));
        assert!(matches!(
            CoreError::rollback("nested"),
            CoreError::Rollback { .. }
        ));
    }
}
